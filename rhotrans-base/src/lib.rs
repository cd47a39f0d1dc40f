#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// Not awful, but it highlights entire function.
#![allow(clippy::unnecessary_wraps)]
// Cool idea but highlights entire function and is too aggressive.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::missing_panics_doc)]
// This is nice to have for cases where we might want to rely on it not returning anything.
#![allow(clippy::semicolon_if_nothing_returned)]
#![allow(clippy::unused_self)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::too_many_lines)]
// Addresses are bounded by the code length, which is checked to fit in a u16
#![allow(clippy::cast_possible_truncation)]

pub mod class_file;
pub mod code;
pub mod constant_pool;
pub mod error;
pub mod id;
pub mod names;
pub mod reader;
pub mod symbols;
pub mod util;

pub mod data {
    pub mod class_file_loader;
    pub mod class_names;
    pub mod classes;
}

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{
    ClassFormatError, LinkageError, LinkageErrorKind, SinkError, TranslateError, VerifyError,
    VerifyErrorKind,
};

/// How many bits a single operand stack slot holds on the target interpreter.
/// This decides whether a `long` or `double` takes up one slot or two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Bits32,
    Bits64,
}
impl WordSize {
    /// The number of slots a 64-bit value takes up
    #[must_use]
    pub fn double_word_slots(self) -> usize {
        match self {
            WordSize::Bits32 => 2,
            WordSize::Bits64 => 1,
        }
    }
}
impl Default for WordSize {
    fn default() -> Self {
        WordSize::Bits32
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// The word size used when computing the operand stack depth of each instruction
    pub word_size: WordSize,
    /// Whether the `LineNumberTable` attribute should be read.
    /// When this is false the attribute is skipped like any unknown attribute.
    pub load_line_numbers: bool,
    /// Whether the `LocalVariableTable` attribute should be read
    pub load_local_variables: bool,
    /// Whether the `StackMapTable` attribute is accepted as a source of branch targets, in
    /// addition to the `StackMap` attribute.
    pub accept_stack_map_table: bool,
    /// Log every batch of pseudo opcodes handed out by the code parser
    /// Uses `tracing::info!`
    pub log_pseudo_opcodes: bool,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            word_size: WordSize::default(),
            load_line_numbers: true,
            load_local_variables: true,
            accept_stack_map_table: true,
            log_pseudo_opcodes: false,
        }
    }
}
