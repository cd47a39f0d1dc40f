//! Errors produced while reading, resolving and verifying a class file.
//! These follow the three families that a JVM itself distinguishes: the class file being
//! structurally broken, the bytecode failing verification, and a symbolic reference failing to
//! link.

use std::borrow::Cow;
use std::fmt;

use crate::code::types::ExceptionHandlerIndex;

/// The class file is structurally broken, or a name/descriptor in it breaks the grammar.
/// This is always fatal for the class being translated.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClassFormatError {
    /// A read ran past the end of the available data
    Truncated { field: &'static str, offset: usize },
    /// Some field had a value that is not allowed
    Malformed {
        field: &'static str,
        offset: usize,
        message: Cow<'static, str>,
    },
    /// A string in the class file was not valid modified utf8
    InvalidUtf8 { field: &'static str, offset: usize },
    /// An unknown constant pool tag
    BadConstantTag { index: u16, tag: u8 },
    /// The index is zero, out of range, or the phantom slot of a long/double
    BadConstantIndex { index: u16 },
    /// The entry at the index exists but was not of the kind that was required
    UnexpectedConstantTag {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },
    /// A long or double was the last entry so there was no room for its second slot
    MissingPhantomSlot { index: u16 },
    /// A class, field or method name did not follow the identifier grammar
    IllegalName { name: String, kind: &'static str },
    /// A field or method descriptor did not follow the descriptor grammar
    IllegalDescriptor { descriptor: String },
    /// A method reference named a special method other than `<init>`
    IllegalMethodName { name: String },
    /// The parameters of a method take up more than 255 local slots
    TooManyParameters { descriptor: String, slots: usize },
}
impl fmt::Display for ClassFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassFormatError::Truncated { field, offset } => {
                write!(f, "truncated class file while reading {} at {}", field, offset)
            }
            ClassFormatError::Malformed {
                field,
                offset,
                message,
            } => write!(f, "bad {} at {}: {}", field, offset, message),
            ClassFormatError::InvalidUtf8 { field, offset } => {
                write!(f, "invalid modified utf8 in {} at {}", field, offset)
            }
            ClassFormatError::BadConstantTag { index, tag } => {
                write!(f, "unknown constant pool tag {} at index {}", tag, index)
            }
            ClassFormatError::BadConstantIndex { index } => {
                write!(f, "bad constant pool index {}", index)
            }
            ClassFormatError::UnexpectedConstantTag {
                index,
                expected,
                found,
            } => write!(
                f,
                "constant pool entry {} is {}, expected {}",
                index, found, expected
            ),
            ClassFormatError::MissingPhantomSlot { index } => write!(
                f,
                "8-byte constant at index {} has no room for its second slot",
                index
            ),
            ClassFormatError::IllegalName { name, kind } => {
                write!(f, "illegal {} name: {}", kind, name)
            }
            ClassFormatError::IllegalDescriptor { descriptor } => {
                write!(f, "illegal descriptor: {}", descriptor)
            }
            ClassFormatError::IllegalMethodName { name } => {
                write!(f, "illegal method reference name: {}", name)
            }
            ClassFormatError::TooManyParameters { descriptor, slots } => write!(
                f,
                "method {} has {} parameter slots, which is more than 255",
                descriptor, slots
            ),
        }
    }
}
impl std::error::Error for ClassFormatError {}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyErrorKind {
    /// `max_locals` is smaller than the slots needed for the parameters
    MaxLocalsTooSmall { max_locals: u16, parameter_slots: u16 },
    /// `code_length` must be in `(0, 0xFFFF)`
    BadCodeLength(u32),
    /// An exception handler whose range or handler address is out of bounds
    BadExceptionHandlerRange {
        start: u16,
        end: u16,
        handler: u16,
    },
    /// The catch type of a handler is not a subclass of `java.lang.Throwable`
    CatchTypeNotThrowable { catch_type: String },
    /// More than one stack map attribute
    DuplicateStackMap,
    /// A stack map entry was at an address out of order or out of bounds
    BadStackMapOffset(u32),
    /// A stack map had an unknown verification type tag
    BadStackMapType(u8),
    /// A stack map frame has more entries than `max_locals`/`max_stack` allows
    StackMapFrameTooLarge,
    /// A line number table entry points outside the code
    BadLineNumberAddress(u16),
    /// A local variable table entry is out of bounds or malformed
    BadLocalVariableTableEntry { name: String },
    /// The opcode is not one that can be translated
    UnknownOpcode(u8),
    /// An operand ran past the end of the bytecode
    TruncatedOperand,
    /// The constant pool entry for an operand is of the wrong kind
    BadConstantOperand { index: u16, expected: &'static str },
    /// A local variable index is outside of `max_locals`
    BadLocalVariableIndex(u32),
    /// The destination of a branch does not have a stack map entry
    MissingBranchTarget(u32),
    /// Padding bytes of a switch instruction were not zero
    NonZeroSwitchPadding,
    /// `tableswitch` had `low > high`, or `lookupswitch` had unsorted or negative-count pairs
    BadSwitch,
    /// `newarray` had an unknown element type
    BadNewArrayType(u8),
    /// A `wide` prefix on an opcode that does not allow it
    BadWideOpcode(u8),
    /// `invokeinterface` count/zero byte mismatch, or `multianewarray` with zero dimensions
    BadOperand(&'static str),
    /// An exception handler boundary address was not seen exactly three times in total
    BadExceptionHandlerAddress {
        index: ExceptionHandlerIndex,
        seen: u8,
    },
    /// A stack map referenced an uninitialized object at an address with no `new` instruction
    MissingNewInstruction(u16),
    /// Parsing was attempted in a state that does not allow it
    BadParserState(&'static str),
    /// The instruction at the address takes more values than are on the operand stack
    StackUnderflow(u16),
    /// The instruction at the address takes half of a long or double from the operand stack
    SplitStackValue(u16),
}
impl fmt::Display for VerifyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyErrorKind::MaxLocalsTooSmall {
                max_locals,
                parameter_slots,
            } => write!(
                f,
                "max_locals {} is less than the {} parameter slots",
                max_locals, parameter_slots
            ),
            VerifyErrorKind::BadCodeLength(len) => write!(f, "bad code length {}", len),
            VerifyErrorKind::BadExceptionHandlerRange {
                start,
                end,
                handler,
            } => write!(
                f,
                "bad exception handler range [{}, {}) -> {}",
                start, end, handler
            ),
            VerifyErrorKind::CatchTypeNotThrowable { catch_type } => {
                write!(f, "catch type {} is not a Throwable", catch_type)
            }
            VerifyErrorKind::DuplicateStackMap => write!(f, "more than one stack map"),
            VerifyErrorKind::BadStackMapOffset(offset) => {
                write!(f, "bad stack map offset {}", offset)
            }
            VerifyErrorKind::BadStackMapType(tag) => write!(f, "bad stack map type tag {}", tag),
            VerifyErrorKind::StackMapFrameTooLarge => write!(f, "stack map frame is too large"),
            VerifyErrorKind::BadLineNumberAddress(address) => {
                write!(f, "bad line number table address {}", address)
            }
            VerifyErrorKind::BadLocalVariableTableEntry { name } => {
                write!(f, "bad local variable table entry for {}", name)
            }
            VerifyErrorKind::UnknownOpcode(opcode) => write!(f, "unknown opcode {:#04x}", opcode),
            VerifyErrorKind::TruncatedOperand => write!(f, "operand runs past the end of code"),
            VerifyErrorKind::BadConstantOperand { index, expected } => {
                write!(f, "constant pool entry {} is not {}", index, expected)
            }
            VerifyErrorKind::BadLocalVariableIndex(index) => {
                write!(f, "bad local variable index {}", index)
            }
            VerifyErrorKind::MissingBranchTarget(address) => {
                write!(f, "no stack map entry for branch target {}", address)
            }
            VerifyErrorKind::NonZeroSwitchPadding => write!(f, "non-zero switch padding"),
            VerifyErrorKind::BadSwitch => write!(f, "malformed switch"),
            VerifyErrorKind::BadNewArrayType(atype) => write!(f, "bad newarray type {}", atype),
            VerifyErrorKind::BadWideOpcode(opcode) => {
                write!(f, "opcode {:#04x} can not be widened", opcode)
            }
            VerifyErrorKind::BadOperand(what) => write!(f, "bad operand: {}", what),
            VerifyErrorKind::BadExceptionHandlerAddress { index, seen } => write!(
                f,
                "exception handler {} boundaries were seen {} times, expected 3",
                index.0, seen
            ),
            VerifyErrorKind::MissingNewInstruction(address) => {
                write!(f, "no new instruction at {} for uninitialized object", address)
            }
            VerifyErrorKind::BadParserState(what) => write!(f, "bad parser state: {}", what),
            VerifyErrorKind::StackUnderflow(address) => {
                write!(f, "operand stack underflow at {}", address)
            }
            VerifyErrorKind::SplitStackValue(address) => {
                write!(f, "instruction at {} splits a long or double on the stack", address)
            }
        }
    }
}

/// A static-semantic violation in a single method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    /// The address of the opcode being parsed, if we got that far
    pub address: Option<u16>,
    /// The source line for the address, if there is a line number table
    pub line: Option<u16>,
    pub kind: VerifyErrorKind,
}
impl VerifyError {
    #[must_use]
    pub fn new(kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            address: None,
            line: None,
            kind,
        }
    }
}
impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "java.lang.VerifyError: {}", self.kind)?;
        if let Some(address) = self.address {
            write!(f, " @{}", address)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}
impl std::error::Error for VerifyError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkageErrorKind {
    IllegalAccess,
    IncompatibleClassChange,
    NoSuchField,
    NoSuchMethod,
    NoClassDefFound,
    Instantiation,
}
impl LinkageErrorKind {
    /// The name of the java error class this corresponds to
    #[must_use]
    pub fn java_name(self) -> &'static str {
        match self {
            LinkageErrorKind::IllegalAccess => "java.lang.IllegalAccessError",
            LinkageErrorKind::IncompatibleClassChange => "java.lang.IncompatibleClassChangeError",
            LinkageErrorKind::NoSuchField => "java.lang.NoSuchFieldError",
            LinkageErrorKind::NoSuchMethod => "java.lang.NoSuchMethodError",
            LinkageErrorKind::NoClassDefFound => "java.lang.NoClassDefFoundError",
            LinkageErrorKind::Instantiation => "java.lang.InstantiationError",
        }
    }
}

/// A symbolic reference failed to link.
/// The message names the member in the same form a JVM would, so that the error could be
/// deferred and thrown at runtime instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkageError {
    pub kind: LinkageErrorKind,
    pub message: String,
}
impl LinkageError {
    pub fn new(kind: LinkageErrorKind, message: impl Into<String>) -> LinkageError {
        LinkageError {
            kind,
            message: message.into(),
        }
    }
}
impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.java_name(), self.message)
    }
}
impl std::error::Error for LinkageError {}

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
}
impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(err) => write!(f, "failed to write output: {}", err),
        }
    }
}
impl std::error::Error for SinkError {}
impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

#[derive(Debug)]
pub enum TranslateError {
    Format(ClassFormatError),
    Verify(VerifyError),
    Linkage(LinkageError),
    Sink(SinkError),
}
impl TranslateError {
    #[must_use]
    pub fn linkage_kind(&self) -> Option<LinkageErrorKind> {
        match self {
            TranslateError::Linkage(err) => Some(err.kind),
            _ => None,
        }
    }

    #[must_use]
    pub fn verify_kind(&self) -> Option<&VerifyErrorKind> {
        match self {
            TranslateError::Verify(err) => Some(&err.kind),
            _ => None,
        }
    }
}
impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslateError::Format(err) => write!(f, "java.lang.ClassFormatError: {}", err),
            TranslateError::Verify(err) => err.fmt(f),
            TranslateError::Linkage(err) => err.fmt(f),
            TranslateError::Sink(err) => err.fmt(f),
        }
    }
}
impl std::error::Error for TranslateError {}
impl From<ClassFormatError> for TranslateError {
    fn from(err: ClassFormatError) -> Self {
        Self::Format(err)
    }
}
impl From<VerifyError> for TranslateError {
    fn from(err: VerifyError) -> Self {
        Self::Verify(err)
    }
}
impl From<VerifyErrorKind> for TranslateError {
    fn from(kind: VerifyErrorKind) -> Self {
        Self::Verify(VerifyError::new(kind))
    }
}
impl From<LinkageError> for TranslateError {
    fn from(err: LinkageError) -> Self {
        Self::Linkage(err)
    }
}
impl From<SinkError> for TranslateError {
    fn from(err: SinkError) -> Self {
        Self::Sink(err)
    }
}
