use std::{error::Error, fmt, path::PathBuf};

#[derive(Debug)]
#[non_exhaustive]
pub enum LoadClassFileError {
    /// The name given was empty
    EmptyPath,
    /// There was an error in reading the file
    ReadError(std::io::Error),
    /// The file existed at the path but could not be used
    BadFile(PathBuf),
    OpaqueError(Box<dyn Error>),
}
impl fmt::Display for LoadClassFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadClassFileError::EmptyPath => write!(f, "empty class name"),
            LoadClassFileError::ReadError(err) => write!(f, "failed to read class file: {}", err),
            LoadClassFileError::BadFile(path) => write!(f, "bad class file at {:?}", path),
            LoadClassFileError::OpaqueError(err) => err.fmt(f),
        }
    }
}
impl Error for LoadClassFileError {}

/// Note: Not exactly a class loader in the java sense, it just finds the bytes of class files
pub trait ClassFileLoader {
    /// Load the bytes of the class file with the given internal name (`java/lang/Object`).
    /// Returns `Ok(None)` if there is no such class file.
    fn load_class_file(&mut self, internal_name: &str)
        -> Result<Option<Vec<u8>>, LoadClassFileError>;
}
impl<'a, T: ClassFileLoader> ClassFileLoader for &'a mut T {
    fn load_class_file(
        &mut self,
        internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        <T as ClassFileLoader>::load_class_file(self, internal_name)
    }
}

/// Tries each loader in turn, the first one that has the class file wins
impl<L: ClassFileLoader> ClassFileLoader for Vec<L> {
    fn load_class_file(
        &mut self,
        internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        for loader in self.iter_mut() {
            if let Some(data) = loader.load_class_file(internal_name)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

/// A loader that never has any class files, for universes that are entirely defined in code
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLoader;
impl ClassFileLoader for EmptyLoader {
    fn load_class_file(
        &mut self,
        _internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        Ok(None)
    }
}

/// A loader over class files held in memory, keyed by internal name
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    files: std::collections::HashMap<String, Vec<u8>>,
}
impl MemoryLoader {
    pub fn insert(&mut self, internal_name: impl Into<String>, data: Vec<u8>) {
        self.files.insert(internal_name.into(), data);
    }
}
impl ClassFileLoader for MemoryLoader {
    fn load_class_file(
        &mut self,
        internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        if internal_name.is_empty() {
            return Err(LoadClassFileError::EmptyPath);
        }
        Ok(self.files.get(internal_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassFileLoader, MemoryLoader};

    #[test]
    fn test_loader_list() {
        let mut first = MemoryLoader::default();
        first.insert("a/A", vec![1]);
        let mut second = MemoryLoader::default();
        second.insert("a/A", vec![2]);
        second.insert("a/B", vec![3]);

        let mut loaders = vec![first, second];
        assert_eq!(loaders.load_class_file("a/A").unwrap(), Some(vec![1]));
        assert_eq!(loaders.load_class_file("a/B").unwrap(), Some(vec![3]));
        assert_eq!(loaders.load_class_file("a/C").unwrap(), None);
        assert!(loaders.load_class_file("").is_err());

        let mut none: Vec<MemoryLoader> = Vec::new();
        assert_eq!(none.load_class_file("a/A").unwrap(), None);
    }
}
