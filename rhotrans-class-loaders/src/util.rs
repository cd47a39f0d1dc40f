use rhotrans_base::data::class_file_loader::{ClassFileLoader, LoadClassFileError};

/// A loader that simply checks the 'left' variant for the class
/// If it doesn't exist there, it checks the right variant
/// It tries to be a bit smart about what error it returns if it isn't found
pub struct CombineLoader<L: ClassFileLoader, R: ClassFileLoader> {
    pub left: L,
    pub right: R,
}
impl<L: ClassFileLoader, R: ClassFileLoader> CombineLoader<L, R> {
    pub fn new(left: L, right: R) -> CombineLoader<L, R> {
        CombineLoader { left, right }
    }
}
impl<L: ClassFileLoader, R: ClassFileLoader> ClassFileLoader for CombineLoader<L, R> {
    fn load_class_file(
        &mut self,
        internal_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        match self.left.load_class_file(internal_name) {
            Ok(Some(data)) => Ok(Some(data)),
            Ok(None) => self.right.load_class_file(internal_name),
            Err(left_err) => match left_err {
                // These point at something being broken rather than the class being elsewhere
                LoadClassFileError::EmptyPath | LoadClassFileError::ReadError(_) => Err(left_err),
                _ => match self.right.load_class_file(internal_name) {
                    Ok(Some(data)) => Ok(Some(data)),
                    Ok(None) => Err(left_err),
                    Err(right_err) => match right_err {
                        LoadClassFileError::EmptyPath | LoadClassFileError::ReadError(_) => {
                            Err(right_err)
                        }
                        _ => Err(left_err),
                    },
                },
            },
        }
    }
}
