//! Small value types shared by the code parser and its consumers

use std::fmt;

use crate::id::ClassId;

/// An index into the exception table of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExceptionHandlerIndex(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Inclusive
    pub start: u16,
    /// Exclusive
    pub end: u16,
    pub handler: u16,
    /// `None` catches everything, which is what `finally` compiles to
    pub catch_type: Option<ClassId>,
}
impl ExceptionHandler {
    /// Whether the address is one of the three boundaries of this handler
    #[must_use]
    pub fn is_boundary(&self, address: u16) -> bool {
        self.start == address || self.end == address || self.handler == address
    }
}

/// An identifier for an interned [`Position`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionId(pub u32);

/// A bytecode address that some debug information refers to.
/// Ordered only by the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub address: u16,
}

/// A line number table entry as it was in the class file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub address: u16,
    pub line: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyBoundError {
    pub name: String,
    pub slot: u16,
}
impl fmt::Display for AlreadyBoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "local variable {} in slot {} is already bound",
            self.name, self.slot
        )
    }
}
impl std::error::Error for AlreadyBoundError {}

/// An entry of the `LocalVariableTable`, clamped to the code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTableEntry {
    pub name: String,
    pub descriptor: String,
    pub index: u16,
    pub start: u16,
    /// Exclusive
    pub end: u16,
    /// The handle of whatever the consumer made for this variable
    bound: Option<u32>,
}
impl LocalVariableTableEntry {
    #[must_use]
    pub fn new(
        name: String,
        descriptor: String,
        index: u16,
        start: u16,
        end: u16,
    ) -> LocalVariableTableEntry {
        LocalVariableTableEntry {
            name,
            descriptor,
            index,
            start,
            end,
            bound: None,
        }
    }

    /// Whether this entry describes the slot `index` at `address`
    #[must_use]
    pub fn matches(&self, index: u16, address: u16) -> bool {
        self.index == index && self.start <= address && address < self.end
    }

    #[must_use]
    pub fn local(&self) -> Option<u32> {
        self.bound
    }

    /// Bind the consumer's handle for the variable. This can only be done once.
    pub fn bind_local(&mut self, local: u32) -> Result<(), AlreadyBoundError> {
        if self.bound.is_some() {
            return Err(AlreadyBoundError {
                name: self.name.clone(),
                slot: self.index,
            });
        }
        self.bound = Some(local);
        Ok(())
    }
}

/// The finished form of a local variable, as handed out by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub slot: u16,
    pub start_address: u16,
    pub length: u16,
}
impl From<&LocalVariableTableEntry> for LocalVariable {
    fn from(entry: &LocalVariableTableEntry) -> LocalVariable {
        LocalVariable {
            name: entry.name.clone(),
            descriptor: entry.descriptor.clone(),
            slot: entry.index,
            start_address: entry.start,
            length: entry.end - entry.start,
        }
    }
}

/// The object created by a `new` instruction before its constructor has run.
/// Keyed by the address of the `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninitializedObject {
    pub address: u16,
    /// The class that the object becomes once initialized.
    /// `None` if a stack map mentioned the address but the `new` has not been parsed yet.
    pub initialized_type: Option<ClassId>,
}

/// The kind of `ldc` instruction, which decides what constants it may load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdcKind {
    Ldc,
    LdcW,
    Ldc2W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}
impl InvokeKind {
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(self, InvokeKind::Static)
    }
}
