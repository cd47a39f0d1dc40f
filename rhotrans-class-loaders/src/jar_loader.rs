use std::{fs::File, io::Read, path::PathBuf};

use rhotrans_base::{
    data::class_file_loader::{ClassFileLoader, LoadClassFileError},
    util::class_file_entry_name,
};
use zip::{result::ZipError, ZipArchive};

/// A class file loader specifically for loading classes from a given jar file
#[derive(Debug)]
pub struct JarClassFileLoader {
    jar_path: PathBuf,
    archive: ZipArchive<File>,
}
impl JarClassFileLoader {
    pub fn new(jar_path: PathBuf) -> std::io::Result<JarClassFileLoader> {
        let file = File::open(&jar_path)?;
        let archive = ZipArchive::new(file)?;

        Ok(JarClassFileLoader { jar_path, archive })
    }

    #[must_use]
    pub fn jar_path(&self) -> &PathBuf {
        &self.jar_path
    }
}
impl ClassFileLoader for JarClassFileLoader {
    fn load_class_file(
        &mut self,
        internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        if internal_name.is_empty() {
            return Err(LoadClassFileError::EmptyPath);
        }

        let entry_name = class_file_entry_name(internal_name);
        let mut file = match self.archive.by_name(&entry_name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(LoadClassFileError::OpaqueError(Box::new(err))),
        };
        if !file.is_file() {
            return Err(LoadClassFileError::BadFile(self.jar_path.join(entry_name)));
        }

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(LoadClassFileError::ReadError)?;

        tracing::trace!("Read {} from {:?}", entry_name, self.jar_path);
        Ok(Some(data))
    }
}
