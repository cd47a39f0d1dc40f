//! A forward-only reader over the bytes of a class file, or some piece of one.
//! Every read names the field it is reading so that a truncated or malformed file produces an
//! error that says where it went wrong.

use crate::error::ClassFormatError;

#[derive(Debug, Clone)]
pub struct ClassFileReader<'a> {
    data: &'a [u8],
    position: usize,
}
impl<'a> ClassFileReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> ClassFileReader<'a> {
        ClassFileReader { data, position: 0 }
    }

    /// The current offset, relative to the start of the data given to the reader
    #[must_use]
    pub fn offset(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Construct a format error at the current offset
    pub fn format_error(
        &self,
        field: &'static str,
        message: impl Into<std::borrow::Cow<'static, str>>,
    ) -> ClassFormatError {
        ClassFormatError::Malformed {
            field,
            offset: self.position,
            message: message.into(),
        }
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], ClassFormatError> {
        let bytes = self.read_bytes(N, field)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read `count` bytes as a slice into the underlying data
    pub fn read_bytes(
        &mut self,
        count: usize,
        field: &'static str,
    ) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::Truncated {
                field,
                offset: self.position,
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize, field: &'static str) -> Result<(), ClassFormatError> {
        self.read_bytes(count, field).map(|_| ())
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, ClassFormatError> {
        self.take::<1>(field).map(|[v]| v)
    }

    pub fn read_i8(&mut self, field: &'static str) -> Result<i8, ClassFormatError> {
        self.take(field).map(i8::from_be_bytes)
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, ClassFormatError> {
        self.take(field).map(u16::from_be_bytes)
    }

    pub fn read_i16(&mut self, field: &'static str) -> Result<i16, ClassFormatError> {
        self.take(field).map(i16::from_be_bytes)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, ClassFormatError> {
        self.take(field).map(u32::from_be_bytes)
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, ClassFormatError> {
        self.take(field).map(i32::from_be_bytes)
    }

    pub fn read_i64(&mut self, field: &'static str) -> Result<i64, ClassFormatError> {
        self.take(field).map(i64::from_be_bytes)
    }

    pub fn read_f32(&mut self, field: &'static str) -> Result<f32, ClassFormatError> {
        self.take(field).map(f32::from_be_bytes)
    }

    pub fn read_f64(&mut self, field: &'static str) -> Result<f64, ClassFormatError> {
        self.take(field).map(f64::from_be_bytes)
    }

    /// Read a `u2` length prefixed string in java's modified utf8
    pub fn read_utf8(&mut self, field: &'static str) -> Result<String, ClassFormatError> {
        let length = self.read_u16(field)?;
        let start = self.position;
        let bytes = self.read_bytes(usize::from(length), field)?;
        cesu8::from_java_cesu8(bytes)
            .map(std::borrow::Cow::into_owned)
            .map_err(|_| ClassFormatError::InvalidUtf8 {
                field,
                offset: start,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::ClassFileReader;
    use crate::error::ClassFormatError;

    #[test]
    fn test_typed_reads() {
        let data = [
            0xFF, 0xFF, 0xFE, 0x00, 0x00, 0x00, 0x2A, 0x3F, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x07,
        ];
        let mut reader = ClassFileReader::new(&data);
        assert_eq!(reader.read_i8("a"), Ok(-1));
        assert_eq!(reader.read_u8("b"), Ok(0xFF));
        assert_eq!(reader.read_i16("c"), Ok(-512));
        assert_eq!(reader.offset(), 4);
        assert_eq!(reader.read_i16("d"), Ok(0x002A));
        assert_eq!(reader.read_f32("e"), Ok(1.0));
        assert_eq!(reader.read_i64("f"), Ok(7));
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_truncated() {
        let data = [0x00, 0x01, 0x02];
        let mut reader = ClassFileReader::new(&data);
        assert_eq!(reader.read_u16("first"), Ok(1));
        assert_eq!(
            reader.read_u16("second"),
            Err(ClassFormatError::Truncated {
                field: "second",
                offset: 2
            })
        );
        // A failed read does not advance
        assert_eq!(reader.offset(), 2);
        assert_eq!(reader.read_u8("third"), Ok(2));
    }

    #[test]
    fn test_utf8() {
        // "a\0b" with the null encoded in the two byte modified utf8 form
        let data = [0x00, 0x04, b'a', 0xC0, 0x80, b'b'];
        let mut reader = ClassFileReader::new(&data);
        assert_eq!(reader.read_utf8("s").as_deref(), Ok("a\0b"));

        let bad = [0x00, 0x02, 0xFF, 0xFF];
        let mut reader = ClassFileReader::new(&bad);
        assert_eq!(
            reader.read_utf8("s"),
            Err(ClassFormatError::InvalidUtf8 {
                field: "s",
                offset: 2
            })
        );
    }

    #[test]
    fn test_skip() {
        let data = [1, 2, 3, 4];
        let mut reader = ClassFileReader::new(&data);
        assert!(reader.skip(3, "skip").is_ok());
        assert_eq!(reader.remaining(), 1);
        assert!(reader.skip(2, "skip").is_err());
    }
}
