use std::path::PathBuf;

/// Convert the internal name of a class (`java/lang/Object`) into the relative path of its class
/// file
#[must_use]
pub fn class_file_relative_path(internal_name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for path_part in internal_name.split('/') {
        path.push(path_part);
    }

    path.set_extension("class");

    path
}

/// Convert the internal name of a class into the name of its entry in a jar.
/// Zip entries always use `/` regardless of the platform.
#[must_use]
pub fn class_file_entry_name(internal_name: &str) -> String {
    let mut name = String::with_capacity(internal_name.len() + 6);
    name.push_str(internal_name);
    name.push_str(".class");
    name
}

/// Convert a symbol table class name (`java.lang.Object`) into the internal name used for class
/// files (`java/lang/Object`)
#[must_use]
pub fn internal_name_from_class_name(name: &str) -> String {
    name.replace('.', "/")
}

// We wrap this because the alternative hasher is not generic
// and Rust doesn't allow unused generics.
// But this allows us to have that.
pub(crate) trait HashWrapperTrait<T> {
    type HashMapHasher;
}
pub(crate) struct HashWrapper;
impl<T> HashWrapperTrait<T> for HashWrapper {
    #[cfg(feature = "implementation-cheaper-map-hashing")]
    type HashMapHasher = nohash_hasher::BuildNoHashHasher<T>;
    #[cfg(not(feature = "implementation-cheaper-map-hashing"))]
    type HashMapHasher = std::collections::hash_map::RandomState;
}
