#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

use std::{
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};

use rhotrans_base::{
    data::class_file_loader::{ClassFileLoader, LoadClassFileError},
    util::class_file_relative_path,
};

pub mod jar_loader;
pub mod util;

/// Loads class files from a list of directories, in the order they were added
#[derive(Debug, Default, Clone)]
pub struct ClassDirectories {
    directories: Vec<PathBuf>,
}
impl ClassDirectories {
    pub fn add(&mut self, path: &Path) -> std::io::Result<()> {
        self.directories.push(path.canonicalize()?);
        Ok(())
    }

    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    #[must_use]
    pub fn load_class_file_with_rel_path(&self, rel_path: &Path) -> Option<(PathBuf, File)> {
        for class_dir in &self.directories {
            let full_path = class_dir.join(rel_path);
            if let Ok(file) = File::open(&full_path) {
                return Some((full_path, file));
            }
        }
        None
    }
}
impl ClassFileLoader for ClassDirectories {
    fn load_class_file(
        &mut self,
        internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        if internal_name.is_empty() {
            return Err(LoadClassFileError::EmptyPath);
        }

        let rel_path = class_file_relative_path(internal_name);
        let (file_path, mut file) = match self.load_class_file_with_rel_path(&rel_path) {
            Some(found) => found,
            None => return Ok(None),
        };

        let mut data = Vec::new();
        if let Err(err) = file.read_to_end(&mut data) {
            // Directories named like a class file are not class files
            if err.kind() == ErrorKind::Other || file_path.is_dir() {
                return Err(LoadClassFileError::BadFile(file_path));
            }
            return Err(LoadClassFileError::ReadError(err));
        }

        tracing::trace!("Read class file {:?}", file_path);
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use rhotrans_base::data::class_file_loader::{ClassFileLoader, LoadClassFileError};

    use super::{util::CombineLoader, ClassDirectories};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rhotrans-{}-{}", name, std::process::id()));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_class_directories() {
        let first = scratch_dir("first");
        let second = scratch_dir("second");
        fs::create_dir_all(first.join("test")).unwrap();
        fs::create_dir_all(second.join("test")).unwrap();
        fs::write(first.join("test").join("Main.class"), [1, 2, 3]).unwrap();
        fs::write(second.join("test").join("Main.class"), [4, 5, 6]).unwrap();
        fs::write(second.join("test").join("Other.class"), [7]).unwrap();

        let mut directories = ClassDirectories::default();
        directories.add(&first).unwrap();
        directories.add(&second).unwrap();
        assert!(directories.add(&first.join("missing")).is_err());

        // The first directory wins
        assert_eq!(
            directories.load_class_file("test/Main").unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            directories.load_class_file("test/Other").unwrap(),
            Some(vec![7])
        );
        assert_eq!(directories.load_class_file("test/Missing").unwrap(), None);
        assert!(matches!(
            directories.load_class_file(""),
            Err(LoadClassFileError::EmptyPath)
        ));

        let mut only_second = ClassDirectories::default();
        only_second.add(&second).unwrap();
        let mut combined = CombineLoader::new(ClassDirectories::default(), only_second);
        assert_eq!(
            combined.load_class_file("test/Main").unwrap(),
            Some(vec![4, 5, 6])
        );
        assert_eq!(combined.load_class_file("test/Missing").unwrap(), None);

        fs::remove_dir_all(first).unwrap();
        fs::remove_dir_all(second).unwrap();
    }
}
