use indexmap::IndexMap;

use crate::{id::ClassId, names};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalKind {
    Array,
    Primitive,
}
impl InternalKind {
    fn from_name(name: &str) -> Option<InternalKind> {
        if crate::id::is_array_class(name) {
            Some(InternalKind::Array)
        } else if names::primitive_descriptor(name).is_some() {
            Some(InternalKind::Primitive)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassNameInfo {
    kind: Option<InternalKind>,
}
impl ClassNameInfo {
    /// Whether a class with this name would come from a class file
    #[must_use]
    pub fn has_class_file(&self) -> bool {
        self.kind.is_none()
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, Some(InternalKind::Array))
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, Some(InternalKind::Primitive))
    }
}

/// Interns class names.
/// The id of a name is its index in insertion order, so both directions are a direct lookup.
#[derive(Debug, Clone)]
pub struct ClassNames {
    names: IndexMap<String, ClassNameInfo>,
}
impl ClassNames {
    #[must_use]
    pub fn new() -> Self {
        let mut class_names = ClassNames {
            names: IndexMap::with_capacity(32),
        };

        // Reserve the first id, 0, so it is always for Object
        class_names.gcid_from_str("java.lang.Object");

        class_names
    }

    /// Get the id of `java.lang.Object`. Cached.
    #[must_use]
    pub fn object_id(&self) -> ClassId {
        ClassId::new_unchecked(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn gcid_from_str(&mut self, name: &str) -> ClassId {
        if let Some(idx) = self.names.get_index_of(name) {
            return ClassId::new_unchecked(idx as u32);
        }

        let kind = InternalKind::from_name(name);
        let (idx, _) = self
            .names
            .insert_full(name.to_owned(), ClassNameInfo { kind });
        ClassId::new_unchecked(idx as u32)
    }

    /// Get the id of an already interned name
    #[must_use]
    pub fn existing_gcid(&self, name: &str) -> Option<ClassId> {
        self.names
            .get_index_of(name)
            .map(|idx| ClassId::new_unchecked(idx as u32))
    }

    /// Get the name and class info for a given id
    #[must_use]
    pub fn name_from_gcid(&self, id: ClassId) -> Option<(&str, &ClassNameInfo)> {
        self.names
            .get_index(id.get() as usize)
            .map(|(name, info)| (name.as_str(), info))
    }

    #[must_use]
    pub fn is_array(&self, id: ClassId) -> bool {
        self.name_from_gcid(id)
            .map_or(false, |(_, info)| info.is_array())
    }

    #[must_use]
    pub fn is_primitive(&self, id: ClassId) -> bool {
        self.name_from_gcid(id)
            .map_or(false, |(_, info)| info.is_primitive())
    }
}
impl Default for ClassNames {
    fn default() -> Self {
        Self::new()
    }
}
