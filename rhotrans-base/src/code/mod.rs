//! Parsing and verification of a single method's `Code` attribute.
//!
//! [`CodeParser`] reads the header tables when it is constructed and then hands the bytecode
//! out one opcode at a time. The consumer drives it: it asks for the pseudo opcodes at the
//! current address, parses an opcode, then parses each of that opcode's operands with the
//! matching `parse_*_operand` method, which checks the operand against the constant pool,
//! the symbol table and the method's tables.
//! [`decode::decode_method`] is the reference consumer.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::{
    constant_pool::{load_checked, tag, Constant, ConstantPool},
    error::{LinkageError, LinkageErrorKind, TranslateError, VerifyError, VerifyErrorKind},
    id::{ClassId, FieldId, MethodId},
    names::{self, NameKind},
    reader::ClassFileReader,
    symbols::SymbolTable,
    Config,
};

use self::{
    pseudo::PseudoOpcode,
    stack_map::{StackMapParser, Target},
    types::{
        ExceptionHandler, ExceptionHandlerIndex, InvokeKind, LdcKind, LineNumber, LocalVariable,
        LocalVariableTableEntry, Position, PositionId, UninitializedObject,
    },
};

pub mod decode;
pub mod opcodes;
pub mod pseudo;
pub mod stack_effect;
pub mod stack_map;
pub mod types;

/// Code length must be strictly below this
const MAX_CODE_LENGTH: u32 = 0xFFFF;

/// The method that the code belongs to
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    pub class: ClassId,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_static: bool,
}
impl<'a> MethodContext<'a> {
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Reading the header tables
    Constructing,
    /// Opcodes can be parsed
    Ready,
    /// Every opcode has been parsed and the method has been verified
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeAttribute {
    StackMap,
    StackMapTable,
    LineNumberTable,
    LocalVariableTable,
    Unknown,
}

pub struct CodeParser<'a, S: SymbolTable + ?Sized> {
    pool: &'a mut ConstantPool,
    table: &'a mut S,
    config: &'a Config,
    context: MethodContext<'a>,
    state: ParserState,

    max_stack: u16,
    max_locals: u16,
    code: &'a [u8],
    /// The offset of the next byte to read
    cursor: usize,
    /// The address of the opcode most recently parsed
    opcode_address: Option<u16>,

    handlers: Vec<ExceptionHandler>,
    /// How many times each handler's boundaries have been handed out as pseudo opcodes
    handler_seen: Vec<u8>,
    has_stack_map: bool,
    targets: BTreeMap<u16, Target>,
    uninitialized: BTreeMap<u16, UninitializedObject>,

    line_numbers: Vec<LineNumber>,
    positions: Vec<Position>,
    position_ids: BTreeMap<u16, PositionId>,
    local_variables: Vec<LocalVariableTableEntry>,

    /// The address the pseudo opcodes were last handed out for
    last_pseudo_address: Option<u16>,
    empty_stack_offsets: Option<Vec<u16>>,
}
impl<'a, S: SymbolTable + ?Sized> CodeParser<'a, S> {
    /// Read the header of a `Code` attribute body: the limits, the bytecode, the exception
    /// table and the attributes.
    pub fn new(
        attribute: &'a [u8],
        pool: &'a mut ConstantPool,
        table: &'a mut S,
        config: &'a Config,
        context: MethodContext<'a>,
    ) -> Result<CodeParser<'a, S>, TranslateError> {
        let mut reader = ClassFileReader::new(attribute);
        let max_stack = reader.read_u16("max_stack")?;
        let max_locals = reader.read_u16("max_locals")?;

        let signature = pool.verify_method_type(
            context.descriptor,
            context.name.starts_with('<'),
            context.is_static,
            table,
        )?;
        let parameter_slots = signature.parameter_slots + usize::from(!context.is_static);
        if parameter_slots > usize::from(max_locals) {
            return Err(VerifyError::new(VerifyErrorKind::MaxLocalsTooSmall {
                max_locals,
                parameter_slots: parameter_slots as u16,
            })
            .into());
        }

        let code_length = reader.read_u32("code_length")?;
        if code_length == 0 || code_length >= MAX_CODE_LENGTH {
            return Err(VerifyError::new(VerifyErrorKind::BadCodeLength(code_length)).into());
        }
        let code = reader.read_bytes(code_length as usize, "code")?;

        let mut parser = CodeParser {
            pool,
            table,
            config,
            context,
            state: ParserState::Constructing,
            max_stack,
            max_locals,
            code,
            cursor: 0,
            opcode_address: None,
            handlers: Vec::new(),
            handler_seen: Vec::new(),
            has_stack_map: false,
            targets: BTreeMap::new(),
            uninitialized: BTreeMap::new(),
            line_numbers: Vec::new(),
            positions: Vec::new(),
            position_ids: BTreeMap::new(),
            local_variables: Vec::new(),
            last_pseudo_address: None,
            empty_stack_offsets: None,
        };

        parser.read_exception_table(&mut reader)?;
        parser.read_attributes(&mut reader, &signature.parameters)?;

        if !reader.is_at_end() {
            tracing::warn!(
                "Code attribute of {} has {} trailing bytes",
                context.name,
                reader.remaining()
            );
        }

        tracing::debug!(
            "Method {}{}: {} bytes, {} handlers, {} targets",
            context.name,
            context.descriptor,
            code_length,
            parser.handlers.len(),
            parser.targets.len()
        );

        parser.state = ParserState::Ready;
        Ok(parser)
    }

    fn code_length_u16(&self) -> u16 {
        // Checked to be below 0xFFFF on construction
        self.code.len() as u16
    }

    fn read_exception_table(
        &mut self,
        reader: &mut ClassFileReader<'_>,
    ) -> Result<(), TranslateError> {
        let code_length = self.code_length_u16();
        let count = reader.read_u16("exception_table_length")?;
        for _ in 0..count {
            let start = reader.read_u16("start_pc")?;
            let end = reader.read_u16("end_pc")?;
            let handler = reader.read_u16("handler_pc")?;
            let catch_index = reader.read_u16("catch_type")?;

            if start >= end || end > code_length || handler >= code_length {
                return Err(VerifyError::new(VerifyErrorKind::BadExceptionHandlerRange {
                    start,
                    end,
                    handler,
                })
                .into());
            }

            let catch_type = if catch_index == 0 {
                None
            } else {
                let catch_type = self.pool.get_resolved_class(catch_index, self.table)?;
                let throwable = self.table.class_id("java.lang.Throwable");
                load_checked(self.table, throwable)?;
                if !self.table.is_assignable_from(throwable, catch_type) {
                    return Err(VerifyError::new(VerifyErrorKind::CatchTypeNotThrowable {
                        catch_type: self.table.display_name(catch_type),
                    })
                    .into());
                }
                Some(catch_type)
            };

            self.handlers.push(ExceptionHandler {
                start,
                end,
                handler,
                catch_type,
            });
            self.handler_seen.push(0);
        }

        Ok(())
    }

    fn read_attributes(
        &mut self,
        reader: &mut ClassFileReader<'_>,
        parameters: &[ClassId],
    ) -> Result<(), TranslateError> {
        let count = reader.read_u16("Code attributes_count")?;
        for _ in 0..count {
            let name_index = reader.read_u16("attribute_name_index")?;
            let length = reader.read_u32("attribute_length")?;
            let body = reader.read_bytes(length as usize, "attribute")?;
            let kind = match self.pool.get_utf8(name_index)? {
                "StackMap" => CodeAttribute::StackMap,
                "StackMapTable" if self.config.accept_stack_map_table => {
                    CodeAttribute::StackMapTable
                }
                "LineNumberTable" if self.config.load_line_numbers => {
                    CodeAttribute::LineNumberTable
                }
                "LocalVariableTable" if self.config.load_local_variables => {
                    CodeAttribute::LocalVariableTable
                }
                name => {
                    tracing::trace!("Skipping code attribute {}", name);
                    CodeAttribute::Unknown
                }
            };

            let mut body = ClassFileReader::new(body);
            match kind {
                CodeAttribute::StackMap | CodeAttribute::StackMapTable => {
                    if self.has_stack_map {
                        return Err(VerifyError::new(VerifyErrorKind::DuplicateStackMap).into());
                    }
                    self.has_stack_map = true;
                    self.read_stack_map(&mut body, kind, parameters)?;
                }
                CodeAttribute::LineNumberTable => self.read_line_number_table(&mut body)?,
                CodeAttribute::LocalVariableTable => self.read_local_variable_table(&mut body)?,
                CodeAttribute::Unknown => {}
            }
        }

        Ok(())
    }

    fn read_stack_map(
        &mut self,
        reader: &mut ClassFileReader<'_>,
        kind: CodeAttribute,
        parameters: &[ClassId],
    ) -> Result<(), TranslateError> {
        let initial_locals = stack_map::initial_locals(
            &*self.table,
            self.context.class,
            self.context.is_constructor(),
            self.context.is_static,
            parameters,
        );
        let code_length = self.code_length_u16();
        let mut parser = StackMapParser {
            pool: &mut *self.pool,
            table: &mut *self.table,
            uninitialized: &mut self.uninitialized,
            code_length,
            max_locals: self.max_locals,
            max_stack: self.max_stack,
        };
        self.targets = if kind == CodeAttribute::StackMap {
            parser.parse_stack_map(reader)?
        } else {
            parser.parse_stack_map_table(reader, initial_locals)?
        };
        Ok(())
    }

    fn read_line_number_table(
        &mut self,
        reader: &mut ClassFileReader<'_>,
    ) -> Result<(), TranslateError> {
        let code_length = self.code_length_u16();
        let count = reader.read_u16("line_number_table_length")?;
        for _ in 0..count {
            let address = reader.read_u16("line_number start_pc")?;
            let line = reader.read_u16("line_number")?;
            if address >= code_length {
                return Err(
                    VerifyError::new(VerifyErrorKind::BadLineNumberAddress(address)).into(),
                );
            }
            self.line_numbers.push(LineNumber { address, line });
            self.intern_position(address);
        }
        Ok(())
    }

    fn read_local_variable_table(
        &mut self,
        reader: &mut ClassFileReader<'_>,
    ) -> Result<(), TranslateError> {
        let code_length = self.code_length_u16();
        let count = reader.read_u16("local_variable_table_length")?;
        for _ in 0..count {
            let start = reader.read_u16("local_variable start_pc")?;
            let length = reader.read_u16("local_variable length")?;
            let name = self
                .pool
                .get_utf8(reader.read_u16("local_variable name_index")?)?
                .to_owned();
            let descriptor = self
                .pool
                .get_utf8(reader.read_u16("local_variable descriptor_index")?)?
                .to_owned();
            let index = reader.read_u16("local_variable index")?;

            let slots = names::field_type_slots(&descriptor);
            let valid = names::is_legal_name(&name, NameKind::Field)
                && names::is_field_type(&descriptor)
                && usize::from(index) + slots <= usize::from(self.max_locals)
                && start < code_length;
            if !valid {
                return Err(
                    VerifyError::new(VerifyErrorKind::BadLocalVariableTableEntry { name }).into(),
                );
            }

            let mut end = u32::from(start) + u32::from(length);
            if end > u32::from(code_length) {
                tracing::warn!(
                    "Local variable {} in {} ends at {}, past the code length {}",
                    name,
                    self.context.name,
                    end,
                    code_length
                );
                end = u32::from(code_length);
            }

            self.local_variables.push(LocalVariableTableEntry::new(
                name,
                descriptor,
                index,
                start,
                end as u16,
            ));
        }
        Ok(())
    }

    fn intern_position(&mut self, address: u16) -> PositionId {
        if let Some(id) = self.position_ids.get(&address) {
            return *id;
        }

        let id = PositionId(self.positions.len() as u32);
        self.positions.push(Position { address });
        self.position_ids.insert(address, id);
        id
    }

    /// The source line of the address, from the last line table entry at or before it
    #[must_use]
    pub fn line_at(&self, address: u16) -> Option<u16> {
        self.line_numbers
            .iter()
            .filter(|entry| entry.address <= address)
            .max_by_key(|entry| entry.address)
            .map(|entry| entry.line)
    }

    /// Construct a verify error at the opcode currently being parsed
    #[must_use]
    pub fn verify_error(&self, kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            address: self.opcode_address,
            line: self.opcode_address.and_then(|address| self.line_at(address)),
            kind,
        }
    }

    fn check_ready(&self) -> Result<(), VerifyError> {
        if self.state == ParserState::Ready {
            Ok(())
        } else {
            Err(self.verify_error(VerifyErrorKind::BadParserState("not ready for opcodes")))
        }
    }

    #[must_use]
    pub fn at_eof(&self) -> bool {
        self.cursor >= self.code.len()
    }

    /// Parse the next opcode, which must be a JVM opcode
    pub fn parse_opcode(&mut self) -> Result<u8, VerifyError> {
        self.check_ready()?;
        if self.at_eof() {
            return Err(self.verify_error(VerifyErrorKind::BadParserState("at end of code")));
        }

        let address = self.cursor as u16;
        self.opcode_address = Some(address);
        let opcode = self.code[self.cursor];
        self.cursor += 1;

        if opcodes::info(opcode).is_none() {
            return Err(self.verify_error(VerifyErrorKind::UnknownOpcode(opcode)));
        }

        Ok(opcode)
    }

    fn read_operand<const N: usize>(&mut self) -> Result<[u8; N], VerifyError> {
        self.check_ready()?;
        let bytes = self
            .code
            .get(self.cursor..self.cursor + N)
            .ok_or_else(|| self.verify_error(VerifyErrorKind::TruncatedOperand))?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        self.cursor += N;
        Ok(out)
    }

    pub fn parse_byte_operand(&mut self) -> Result<i8, VerifyError> {
        self.read_operand().map(i8::from_be_bytes)
    }

    pub fn parse_unsigned_byte_operand(&mut self) -> Result<u8, VerifyError> {
        self.read_operand::<1>().map(|[v]| v)
    }

    pub fn parse_short_operand(&mut self) -> Result<i16, VerifyError> {
        self.read_operand().map(i16::from_be_bytes)
    }

    pub fn parse_unsigned_short_operand(&mut self) -> Result<u16, VerifyError> {
        self.read_operand().map(u16::from_be_bytes)
    }

    pub fn parse_int_operand(&mut self) -> Result<i32, VerifyError> {
        self.read_operand().map(i32::from_be_bytes)
    }

    fn bad_constant(&self, index: u16, expected: &'static str) -> VerifyError {
        self.verify_error(VerifyErrorKind::BadConstantOperand { index, expected })
    }

    /// Parse the index of an `ldc`, `ldc_w` or `ldc2_w` and get the constant it loads
    pub fn parse_constant_pool_operand(
        &mut self,
        kind: LdcKind,
    ) -> Result<Constant, TranslateError> {
        let index = match kind {
            LdcKind::Ldc => u16::from(self.parse_unsigned_byte_operand()?),
            LdcKind::LdcW | LdcKind::Ldc2W => self.parse_unsigned_short_operand()?,
        };

        let tag = self.pool.tag(index).ok();
        Ok(match (kind, tag) {
            (LdcKind::Ldc2W, Some(tag::LONG)) => Constant::Long(self.pool.get_long(index)?),
            (LdcKind::Ldc2W, Some(tag::DOUBLE)) => Constant::Double(self.pool.get_double(index)?),
            (LdcKind::Ldc2W, _) => return Err(self.bad_constant(index, "Long or Double").into()),
            (_, Some(tag::INTEGER)) => Constant::Integer(self.pool.get_integer(index)?),
            (_, Some(tag::FLOAT)) => Constant::Float(self.pool.get_float(index)?),
            (_, Some(tag::STRING)) => Constant::String(self.pool.get_string(index)?.to_owned()),
            (_, Some(tag::CLASS)) => {
                Constant::Class(self.pool.get_resolved_class(index, self.table)?)
            }
            _ => {
                return Err(self
                    .bad_constant(index, "Integer, Float, String or Class")
                    .into())
            }
        })
    }

    /// Parse and resolve the field of a `getfield`/`putfield`/`getstatic`/`putstatic`
    pub fn parse_field_operand(&mut self, is_static: bool) -> Result<FieldId, TranslateError> {
        let index = self.parse_unsigned_short_operand()?;
        if self.pool.tag(index).ok() != Some(tag::FIELD_REF) {
            return Err(self.bad_constant(index, "Fieldref").into());
        }
        self.pool.get_resolved_field(index, is_static, self.table)
    }

    /// Parse and resolve the method of an invoke instruction.
    /// For `invokeinterface` this also reads the count and zero bytes.
    pub fn parse_method_operand(&mut self, kind: InvokeKind) -> Result<MethodId, TranslateError> {
        let index = self.parse_unsigned_short_operand()?;
        let tag = self.pool.tag(index).ok();
        let (tag_ok, expected) = match kind {
            InvokeKind::Interface => (
                tag == Some(tag::INTERFACE_METHOD_REF),
                "InterfaceMethodref",
            ),
            InvokeKind::Virtual | InvokeKind::Special | InvokeKind::Static => {
                (tag == Some(tag::METHOD_REF), "Methodref")
            }
        };
        if !tag_ok {
            return Err(self.bad_constant(index, expected).into());
        }

        let (name, _) = self.pool.member_name_and_type(index)?;
        if name.starts_with('<') && kind != InvokeKind::Special {
            return Err(self
                .verify_error(VerifyErrorKind::BadOperand(
                    "constructors can only be called by invokespecial",
                ))
                .into());
        }

        let method_id = self.pool.get_resolved_method(
            index,
            kind.is_static(),
            kind == InvokeKind::Interface,
            self.table,
        )?;

        if kind == InvokeKind::Interface {
            let count = self.parse_unsigned_byte_operand()?;
            let zero = self.parse_unsigned_byte_operand()?;
            let slots = self
                .table
                .method(method_id)
                .map_or(0, |method| method.signature.parameter_slots);
            if usize::from(count) != slots + 1 {
                return Err(self
                    .verify_error(VerifyErrorKind::BadOperand("invokeinterface count"))
                    .into());
            }
            if zero != 0 {
                return Err(self
                    .verify_error(VerifyErrorKind::BadOperand("invokeinterface zero byte"))
                    .into());
            }
        }

        Ok(method_id)
    }

    /// Parse the element type of a `newarray`, giving the array class
    pub fn parse_new_array_operand(&mut self) -> Result<ClassId, TranslateError> {
        let atype = self.parse_unsigned_byte_operand()?;
        let name = match atype {
            4 => "[Z",
            5 => "[C",
            6 => "[F",
            7 => "[D",
            8 => "[B",
            9 => "[S",
            10 => "[I",
            11 => "[J",
            _ => return Err(self.verify_error(VerifyErrorKind::BadNewArrayType(atype)).into()),
        };
        let id = self.table.class_id(name);
        load_checked(self.table, id)?;
        Ok(id)
    }

    /// Parse the class of a `new`, which becomes the type of the uninitialized object made at
    /// this address
    pub fn parse_new_operand(&mut self) -> Result<ClassId, TranslateError> {
        let index = self.parse_unsigned_short_operand()?;
        if self.pool.tag(index).ok() != Some(tag::CLASS) {
            return Err(self.bad_constant(index, "Class").into());
        }
        let id = self.pool.get_resolved_class(index, self.table)?;

        if self.table.component_type(id).is_some() {
            return Err(self
                .verify_error(VerifyErrorKind::BadOperand("new of an array class"))
                .into());
        }
        if self.table.is_interface(id) || self.table.is_abstract(id) {
            return Err(LinkageError::new(
                LinkageErrorKind::Instantiation,
                self.table.display_name(id),
            )
            .into());
        }

        let address = self.opcode_address.unwrap_or_default();
        self.uninitialized
            .entry(address)
            .or_insert(UninitializedObject {
                address,
                initialized_type: None,
            })
            .initialized_type = Some(id);
        Ok(id)
    }

    /// Parse the class of `anewarray`, `checkcast`, `instanceof` or `multianewarray`
    pub fn parse_class_operand(&mut self) -> Result<ClassId, TranslateError> {
        let index = self.parse_unsigned_short_operand()?;
        if self.pool.tag(index).ok() != Some(tag::CLASS) {
            return Err(self.bad_constant(index, "Class").into());
        }
        self.pool.get_resolved_class(index, self.table)
    }

    /// Parse a local variable index, which is two bytes after `wide`.
    /// Longs and doubles also use the slot after the index.
    pub fn parse_local_variable_operand(
        &mut self,
        wide: bool,
        is_two_word: bool,
    ) -> Result<u16, VerifyError> {
        let index = if wide {
            self.parse_unsigned_short_operand()?
        } else {
            u16::from(self.parse_unsigned_byte_operand()?)
        };
        self.check_local_variable_index(index, is_two_word)
    }

    /// Check a local variable index that is part of the opcode, like `iload_3`
    pub fn check_local_variable_index(
        &self,
        index: u16,
        is_two_word: bool,
    ) -> Result<u16, VerifyError> {
        let slots = if is_two_word { 2 } else { 1 };
        if u32::from(index) + slots > u32::from(self.max_locals) {
            return Err(self.verify_error(VerifyErrorKind::BadLocalVariableIndex(u32::from(index))));
        }
        Ok(index)
    }

    /// Parse a branch offset, giving the destination address, which must have a stack map entry
    pub fn parse_branch_operand(&mut self, long: bool) -> Result<u16, VerifyError> {
        let offset = if long {
            i64::from(self.parse_int_operand()?)
        } else {
            i64::from(self.parse_short_operand()?)
        };
        let destination = i64::from(self.opcode_address.unwrap_or_default()) + offset;
        let missing =
            || VerifyErrorKind::MissingBranchTarget(u32::try_from(destination).unwrap_or(u32::MAX));

        let destination = match u16::try_from(destination) {
            Ok(destination) if destination < self.code_length_u16() => destination,
            _ => return Err(self.verify_error(missing())),
        };
        if !self.targets.contains_key(&destination) {
            return Err(self.verify_error(missing()));
        }

        Ok(destination)
    }

    /// Skip the padding after a `tableswitch`/`lookupswitch` opcode, which aligns the operands
    /// to four bytes from the start of the code
    pub fn parse_switch_padding(&mut self) -> Result<(), VerifyError> {
        while self.cursor % 4 != 0 {
            let [padding] = self.read_operand::<1>()?;
            if padding != 0 {
                return Err(self.verify_error(VerifyErrorKind::NonZeroSwitchPadding));
            }
        }
        Ok(())
    }

    /// Parse the opcode that follows `wide`
    pub fn parse_wide_opcode(&mut self) -> Result<u8, VerifyError> {
        let [opcode] = self.read_operand::<1>()?;
        if !opcodes::is_widenable(opcode) {
            return Err(self.verify_error(VerifyErrorKind::BadWideOpcode(opcode)));
        }
        Ok(opcode)
    }

    /// Get the pseudo opcodes at the current address, which is the code length once every
    /// opcode has been parsed.
    /// Each address is only handed out once, a second call at the same address is empty.
    pub fn get_last_pseudo_opcodes(&mut self) -> SmallVec<[PseudoOpcode; 4]> {
        let mut ops = SmallVec::new();
        if self.state != ParserState::Ready {
            return ops;
        }

        let address = self.cursor as u16;
        if self.last_pseudo_address == Some(address) {
            return ops;
        }
        self.last_pseudo_address = Some(address);

        let mut has_catch = false;
        for (i, handler) in self.handlers.iter().enumerate() {
            let index = ExceptionHandlerIndex(i);
            let seen = &mut self.handler_seen[i];
            if handler.start == address {
                ops.push(PseudoOpcode::Try(index));
                *seen = seen.saturating_add(1);
            }
            if handler.end == address {
                ops.push(PseudoOpcode::TryEnd(index));
                *seen = seen.saturating_add(1);
            }
            if handler.handler == address {
                ops.push(PseudoOpcode::Catch(index));
                *seen = seen.saturating_add(1);
                has_catch = true;
            }
        }

        // A handler is already a landmark, so it never gets a target as well
        if !has_catch && self.targets.contains_key(&address) {
            ops.push(PseudoOpcode::Target(address));
        }

        if let Some(id) = self.position_ids.get(&address) {
            ops.push(PseudoOpcode::Position(*id));
        }

        ops.sort();

        if self.config.log_pseudo_opcodes && !ops.is_empty() {
            tracing::info!("@{} {:?}", address, ops);
        }

        ops
    }

    /// Finish parsing, after every opcode has been parsed, and run the checks that need the
    /// whole method
    pub fn finish(&mut self) -> Result<(), VerifyError> {
        self.check_ready()?;
        if !self.at_eof() {
            return Err(self.verify_error(VerifyErrorKind::BadParserState(
                "finished before the end of code",
            )));
        }
        self.state = ParserState::Eof;

        self.verify_exception_handler_instruction_addresses()?;
        self.verify_uninitialized_object_class_addresses()
    }

    /// Each handler's start, end and handler address must land on instruction boundaries,
    /// which means they were each handed out as pseudo opcodes once.
    pub fn verify_exception_handler_instruction_addresses(&self) -> Result<(), VerifyError> {
        for (i, seen) in self.handler_seen.iter().enumerate() {
            if *seen != 3 {
                return Err(VerifyError::new(
                    VerifyErrorKind::BadExceptionHandlerAddress {
                        index: ExceptionHandlerIndex(i),
                        seen: *seen,
                    },
                ));
            }
        }
        Ok(())
    }

    /// Every uninitialized object that a stack map mentioned must have had its `new` parsed
    pub fn verify_uninitialized_object_class_addresses(&self) -> Result<(), VerifyError> {
        match self
            .uninitialized
            .values()
            .find(|object| object.initialized_type.is_none())
        {
            Some(object) => Err(VerifyError::new(VerifyErrorKind::MissingNewInstruction(
                object.address,
            ))),
            None => Ok(()),
        }
    }

    /// The addresses that start with an empty operand stack, computed on first use
    pub fn empty_stack_offsets(&mut self) -> Result<&[u16], VerifyError> {
        if self.empty_stack_offsets.is_none() {
            let offsets = stack_effect::empty_stack_offsets(
                self.code,
                self.pool,
                &self.handlers,
                &self.targets,
                self.config.word_size,
            )
            .map_err(VerifyError::new)?;
            self.empty_stack_offsets = Some(offsets);
        }
        Ok(self.empty_stack_offsets.as_deref().unwrap_or_default())
    }

    /// The line number table, packed as `(address << 16) | line`.
    /// Addresses are moved forward to the next instruction with an empty stack, since that is
    /// the only place a breakpoint can go, except for the start of a handler.
    pub fn get_line_number_table(&mut self) -> Result<Vec<u32>, VerifyError> {
        self.empty_stack_offsets()?;
        let offsets = self.empty_stack_offsets.as_deref().unwrap_or_default();

        let mut table = Vec::with_capacity(self.line_numbers.len());
        for entry in &self.line_numbers {
            let is_handler = self
                .handlers
                .iter()
                .any(|handler| handler.handler == entry.address);
            let address = if is_handler {
                entry.address
            } else {
                match offsets.binary_search(&entry.address) {
                    Ok(_) => entry.address,
                    Err(i) => offsets.get(i).copied().unwrap_or(entry.address),
                }
            };
            if address != entry.address {
                tracing::trace!(
                    "Moved line {} from {} to {}",
                    entry.line,
                    entry.address,
                    address
                );
            }
            table.push((u32::from(address) << 16) | u32::from(entry.line));
        }

        Ok(table)
    }

    #[must_use]
    pub fn get_local_variable_table(&self) -> Vec<LocalVariable> {
        self.local_variables.iter().map(LocalVariable::from).collect()
    }

    /// The local variable table entry for the slot at the address
    #[must_use]
    pub fn local_variable(&self, index: u16, address: u16) -> Option<&LocalVariableTableEntry> {
        self.local_variables
            .iter()
            .find(|entry| entry.matches(index, address))
    }

    pub fn local_variable_mut(
        &mut self,
        index: u16,
        address: u16,
    ) -> Option<&mut LocalVariableTableEntry> {
        self.local_variables
            .iter_mut()
            .find(|entry| entry.matches(index, address))
    }

    /// The addresses that have debug information, in order
    #[must_use]
    pub fn debug_addresses(&self) -> Vec<u16> {
        let mut positions = self.positions.clone();
        positions.sort();
        positions.into_iter().map(|position| position.address).collect()
    }

    #[must_use]
    pub fn position(&self, id: PositionId) -> Option<Position> {
        self.positions.get(id.0 as usize).copied()
    }

    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    #[must_use]
    pub fn context(&self) -> &MethodContext<'a> {
        &self.context
    }

    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[must_use]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[must_use]
    pub fn code_length(&self) -> u16 {
        self.code_length_u16()
    }

    /// The address of the next byte to be parsed
    #[must_use]
    pub fn cursor_address(&self) -> u16 {
        self.cursor as u16
    }

    #[must_use]
    pub fn opcode_address(&self) -> Option<u16> {
        self.opcode_address
    }

    #[must_use]
    pub fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    #[must_use]
    pub fn targets(&self) -> &BTreeMap<u16, Target> {
        &self.targets
    }

    #[must_use]
    pub fn uninitialized_object(&self, address: u16) -> Option<&UninitializedObject> {
        self.uninitialized.get(&address)
    }

    #[must_use]
    pub fn symbols(&self) -> &S {
        &*self.table
    }

    #[must_use]
    pub fn constant_pool(&self) -> &ConstantPool {
        &*self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::{
        pseudo::PseudoOpcode,
        types::{ExceptionHandlerIndex, InvokeKind},
        ParserState,
    };
    use crate::{
        data::classes::ClassDefinition,
        error::{LinkageErrorKind, VerifyErrorKind},
        symbols::{ClassAccess, MemberAccess},
        test_util::{CodeBuilder, Frame, MethodFixture, PoolBuilder, VType},
    };

    #[test]
    fn test_header_checks() {
        let mut pool = PoolBuilder::new();
        let string = pool.class("java/lang/String");
        let mut fixture = MethodFixture::new(&pool);

        let code = CodeBuilder::new(1, 1, &[0xb1]).build();
        let err = fixture.parser("run", "(J)V", true, &code).err().unwrap();
        assert_eq!(
            err.verify_kind(),
            Some(&VerifyErrorKind::MaxLocalsTooSmall {
                max_locals: 1,
                parameter_slots: 2
            })
        );
        let code = CodeBuilder::new(1, 0, &[0xb1]).build();
        assert!(fixture.parser("run", "()V", false, &code).is_err());

        let code = CodeBuilder::new(1, 1, &[]).build();
        let err = fixture.parser("run", "()V", true, &code).err().unwrap();
        assert_eq!(err.verify_kind(), Some(&VerifyErrorKind::BadCodeLength(0)));

        let mut code = CodeBuilder::new(1, 1, &[0x00, 0xb1]);
        code.handler(1, 1, 0, 0);
        let err = fixture.parser("run", "()V", true, &code.build()).err().unwrap();
        assert!(matches!(
            err.verify_kind(),
            Some(VerifyErrorKind::BadExceptionHandlerRange { .. })
        ));

        let mut code = CodeBuilder::new(1, 1, &[0x00, 0xb1]);
        code.handler(0, 1, 1, string);
        let err = fixture.parser("run", "()V", true, &code.build()).err().unwrap();
        assert!(matches!(
            err.verify_kind(),
            Some(VerifyErrorKind::CatchTypeNotThrowable { .. })
        ));

        let code = CodeBuilder::new(1, 1, &[0xb1]).build();
        let parser = fixture.parser("run", "(I)V", true, &code).unwrap();
        assert_eq!(parser.state(), ParserState::Ready);
        assert_eq!(parser.code_length(), 1);
    }

    #[test]
    fn test_duplicate_stack_map() {
        let mut pool = PoolBuilder::new();
        let mut code = CodeBuilder::new(1, 0, &[0x00, 0xb1]);
        code.stack_map(&mut pool, &[]);
        code.stack_map(&mut pool, &[]);
        let mut fixture = MethodFixture::new(&pool);
        let err = fixture.parser("run", "()V", true, &code.build()).err().unwrap();
        assert_eq!(err.verify_kind(), Some(&VerifyErrorKind::DuplicateStackMap));
    }

    /// Three handlers whose regions share their boundaries
    #[test]
    fn test_overlapping_handlers() {
        let mut pool = PoolBuilder::new();
        // 0: iconst_0, 1: pop, 2: return, 3: athrow
        let mut code = CodeBuilder::new(1, 0, &[0x03, 0x57, 0xb1, 0xbf]);
        code.handler(0, 2, 3, 0);
        code.handler(0, 2, 3, 0);
        code.handler(1, 2, 3, 0);
        code.line_numbers(&mut pool, &[(0, 1), (3, 2)]);
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();

        let h = ExceptionHandlerIndex;
        let mut batches = Vec::new();
        while !parser.at_eof() {
            batches.push(parser.get_last_pseudo_opcodes().into_vec());
            // A second call at the same address has nothing
            assert!(parser.get_last_pseudo_opcodes().is_empty());
            parser.parse_opcode().unwrap();
        }
        batches.push(parser.get_last_pseudo_opcodes().into_vec());

        assert_eq!(
            batches,
            vec![
                vec![
                    PseudoOpcode::Try(h(1)),
                    PseudoOpcode::Try(h(0)),
                    PseudoOpcode::Position(super::types::PositionId(0)),
                ],
                vec![PseudoOpcode::Try(h(2))],
                vec![
                    PseudoOpcode::TryEnd(h(0)),
                    PseudoOpcode::TryEnd(h(1)),
                    PseudoOpcode::TryEnd(h(2)),
                ],
                vec![
                    PseudoOpcode::Catch(h(0)),
                    PseudoOpcode::Catch(h(1)),
                    PseudoOpcode::Catch(h(2)),
                    PseudoOpcode::Position(super::types::PositionId(1)),
                ],
                vec![],
            ]
        );
        parser.finish().unwrap();
        assert_eq!(parser.state(), ParserState::Eof);
    }

    #[test]
    fn test_handler_boundary_inside_instruction() {
        let pool = PoolBuilder::new();
        // 0: sipush 1, 3: pop, 4: return, 5: athrow
        let mut code = CodeBuilder::new(1, 0, &[0x11, 0x00, 0x01, 0x57, 0xb1, 0xbf]);
        code.handler(0, 1, 5, 0);
        code.handler(0, 4, 5, 0);
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        for opcode_length in [3, 1, 1, 1] {
            parser.get_last_pseudo_opcodes();
            parser.parse_opcode().unwrap();
            for _ in 1..opcode_length {
                parser.parse_unsigned_byte_operand().unwrap();
            }
        }
        parser.get_last_pseudo_opcodes();
        let err = parser.finish().unwrap_err();
        assert_eq!(
            err.kind,
            VerifyErrorKind::BadExceptionHandlerAddress {
                index: ExceptionHandlerIndex(0),
                seen: 2
            }
        );
    }

    #[test]
    fn test_line_number_snapping() {
        let mut pool = PoolBuilder::new();
        // 0: iconst_1, 1: iconst_2, 2: iadd, 3: pop, 4: return
        let mut code = CodeBuilder::new(2, 0, &[0x04, 0x05, 0x60, 0x57, 0xb1]);
        code.line_numbers(&mut pool, &[(0, 10), (1, 11), (4, 12)]);
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();

        assert_eq!(parser.empty_stack_offsets().unwrap(), &[0, 4]);
        assert_eq!(
            parser.get_line_number_table().unwrap(),
            vec![10, (4 << 16) | 11, (4 << 16) | 12]
        );
        assert_eq!(parser.debug_addresses(), vec![0, 1, 4]);
        assert_eq!(parser.line_at(3), Some(11));
    }

    #[test]
    fn test_line_number_at_handler() {
        let mut pool = PoolBuilder::new();
        // 0: iconst_0, 1: pop, 2: return, 3: pop, 4: return
        let mut code = CodeBuilder::new(1, 0, &[0x03, 0x57, 0xb1, 0x57, 0xb1]);
        code.handler(0, 2, 3, 0);
        code.line_numbers(&mut pool, &[(0, 1), (3, 2)]);
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        // The handler starts with the exception on the stack, but keeps its line
        assert_eq!(
            parser.get_line_number_table().unwrap(),
            vec![1, (3 << 16) | 2]
        );
    }

    #[test]
    fn test_bad_line_number_address() {
        let mut pool = PoolBuilder::new();
        let mut code = CodeBuilder::new(1, 0, &[0xb1]);
        code.line_numbers(&mut pool, &[(1, 1)]);
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let err = fixture.parser("run", "()V", true, &code).err().unwrap();
        assert_eq!(
            err.verify_kind(),
            Some(&VerifyErrorKind::BadLineNumberAddress(1))
        );

        // Skipped entirely when line numbers are not loaded
        fixture.config.load_line_numbers = false;
        assert!(fixture.parser("run", "()V", true, &code).is_ok());
    }

    #[test]
    fn test_local_variable_table() {
        let mut pool = PoolBuilder::new();
        let mut code = CodeBuilder::new(2, 3, &[0x00, 0x00, 0xb1]);
        code.local_variables(
            &mut pool,
            &[
                (0, 3, "this", "Ltest/Main;", 0),
                (1, 10, "total", "J", 1),
            ],
        );
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", false, &code).unwrap();

        let table = parser.get_local_variable_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].name, "this");
        assert_eq!(table[0].descriptor, "Ltest/Main;");
        assert_eq!((table[0].slot, table[0].start_address, table[0].length), (0, 0, 3));
        // Clamped to the code
        assert_eq!((table[1].slot, table[1].start_address, table[1].length), (1, 1, 2));

        assert_eq!(parser.local_variable(1, 2).unwrap().name, "total");
        assert!(parser.local_variable(1, 0).is_none());
        let entry = parser.local_variable_mut(0, 0).unwrap();
        entry.bind_local(4).unwrap();
        assert!(entry.bind_local(5).is_err());
        assert_eq!(parser.local_variable(0, 1).unwrap().local(), Some(4));

        for bad in [
            (0, 3, "1st", "I", 0),
            (0, 3, "value", "Q", 0),
            (0, 3, "value", "J", 2),
        ] {
            let mut pool = PoolBuilder::new();
            let mut code = CodeBuilder::new(2, 3, &[0x00, 0x00, 0xb1]);
            code.local_variables(&mut pool, &[bad]);
            let code = code.build();
            let mut fixture = MethodFixture::new(&pool);
            let err = fixture.parser("run", "()V", false, &code).err().unwrap();
            assert!(matches!(
                err.verify_kind(),
                Some(VerifyErrorKind::BadLocalVariableTableEntry { .. })
            ));
        }
    }

    #[test]
    fn test_branch_targets() {
        let mut pool = PoolBuilder::new();
        // 0: iload_0, 1: ifeq 5, 4: return, 5: return
        let mut code = CodeBuilder::new(1, 1, &[0x1a, 0x99, 0x00, 0x04, 0xb1, 0xb1]);
        code.stack_map(
            &mut pool,
            &[Frame {
                offset: 5,
                locals: vec![VType::Integer],
                stack: vec![],
            }],
        );
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "(I)V", true, &code).unwrap();
        parser.parse_opcode().unwrap();
        assert_eq!(parser.parse_opcode().unwrap(), 0x99);
        assert_eq!(parser.parse_branch_operand(false).unwrap(), 5);

        // The same code, branching to an address without a stack map entry
        let pool = PoolBuilder::new();
        let code = CodeBuilder::new(1, 1, &[0x1a, 0x99, 0x00, 0x03, 0xb1, 0xb1]);
        let mut fixture = MethodFixture::new(&pool);
        let code = code.build();
        let mut parser = fixture.parser("run", "(I)V", true, &code).unwrap();
        parser.parse_opcode().unwrap();
        parser.parse_opcode().unwrap();
        let err = parser.parse_branch_operand(false).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::MissingBranchTarget(4));
        assert_eq!(err.address, Some(1));
    }

    #[test]
    fn test_local_variable_operand() {
        let pool = PoolBuilder::new();
        let code = CodeBuilder::new(2, 2, &[0x15, 0x01, 0x16, 0x01, 0xb1]).build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        parser.parse_opcode().unwrap();
        assert_eq!(parser.parse_local_variable_operand(false, false).unwrap(), 1);
        parser.parse_opcode().unwrap();
        let err = parser.parse_local_variable_operand(false, true).unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::BadLocalVariableIndex(1));
    }

    #[test]
    fn test_uninitialized_objects() {
        let mut pool = PoolBuilder::new();
        let point = pool.class("test/Point");
        let init = pool.methodref("test/Point", "<init>", "()V");
        // 0: new Point, 3: dup, 4: invokespecial <init>, 7: pop, 8: return
        #[rustfmt::skip]
        let bytes = [
            0xbb, (point >> 8) as u8, point as u8,
            0x59,
            0xb7, (init >> 8) as u8, init as u8,
            0x57,
            0xb1,
        ];
        let mut code = CodeBuilder::new(2, 0, &bytes);
        code.stack_map(
            &mut pool,
            &[Frame {
                offset: 3,
                locals: vec![],
                stack: vec![VType::Uninitialized(0)],
            }],
        );
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let point_id = fixture
            .universe
            .define(ClassDefinition::new("test.Point").method(
                "<init>",
                "()V",
                MemberAccess::PUBLIC,
            ))
            .unwrap();
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        assert_eq!(parser.uninitialized_object(0).unwrap().initialized_type, None);

        parser.parse_opcode().unwrap();
        assert_eq!(parser.parse_new_operand().unwrap(), point_id);
        assert_eq!(
            parser.uninitialized_object(0).unwrap().initialized_type,
            Some(point_id)
        );
        parser.parse_opcode().unwrap();
        parser.parse_opcode().unwrap();
        parser.parse_method_operand(InvokeKind::Special).unwrap();
        parser.parse_opcode().unwrap();
        parser.parse_opcode().unwrap();
        parser.finish().unwrap();

        // A stack map that refers to a `new` that isn't there
        let mut pool = PoolBuilder::new();
        let mut code = CodeBuilder::new(1, 0, &[0x01, 0x57, 0xb1]);
        code.stack_map(
            &mut pool,
            &[Frame {
                offset: 1,
                locals: vec![],
                stack: vec![VType::Uninitialized(0)],
            }],
        );
        let code = code.build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        while !parser.at_eof() {
            parser.parse_opcode().unwrap();
        }
        let err = parser.finish().unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::MissingNewInstruction(0));
    }

    #[test]
    fn test_new_of_abstract_class() {
        let mut pool = PoolBuilder::new();
        let shape = pool.class("test/Shape");
        let code = CodeBuilder::new(1, 0, &[0xbb, (shape >> 8) as u8, shape as u8, 0x57, 0xb1])
            .build();
        let mut fixture = MethodFixture::new(&pool);
        fixture
            .universe
            .define(
                ClassDefinition::new("test.Shape")
                    .access(ClassAccess::PUBLIC | ClassAccess::ABSTRACT),
            )
            .unwrap();
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        parser.parse_opcode().unwrap();
        let err = parser.parse_new_operand().unwrap_err();
        assert_eq!(err.linkage_kind(), Some(LinkageErrorKind::Instantiation));
    }

    #[test]
    fn test_invoke_operands() {
        let mut pool = PoolBuilder::new();
        let compare = pool.interface_methodref("test/Ordered", "compare", "(JI)I");
        let init = pool.methodref("java/lang/Object", "<init>", "()V");
        #[rustfmt::skip]
        let bytes = [
            // invokeinterface with the right count
            0xb9, (compare >> 8) as u8, compare as u8, 4, 0,
            // invokeinterface with a bad count
            0xb9, (compare >> 8) as u8, compare as u8, 3, 0,
            // invokevirtual of a constructor
            0xb6, (init >> 8) as u8, init as u8,
            0xb1,
        ];
        let code = CodeBuilder::new(4, 1, &bytes).build();
        let mut fixture = MethodFixture::new(&pool);
        fixture
            .universe
            .define(
                ClassDefinition::new("test.Ordered")
                    .access(ClassAccess::PUBLIC | ClassAccess::INTERFACE | ClassAccess::ABSTRACT)
                    .method(
                        "compare",
                        "(JI)I",
                        MemberAccess::PUBLIC | MemberAccess::ABSTRACT,
                    ),
            )
            .unwrap();
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();

        parser.parse_opcode().unwrap();
        assert!(parser.parse_method_operand(InvokeKind::Interface).is_ok());
        parser.parse_opcode().unwrap();
        let err = parser
            .parse_method_operand(InvokeKind::Interface)
            .unwrap_err();
        assert_eq!(
            err.verify_kind(),
            Some(&VerifyErrorKind::BadOperand("invokeinterface count"))
        );
        parser.parse_opcode().unwrap();
        let err = parser.parse_method_operand(InvokeKind::Virtual).unwrap_err();
        assert!(matches!(
            err.verify_kind(),
            Some(VerifyErrorKind::BadOperand(_))
        ));
    }

    #[test]
    fn test_interface_methodref_needs_invokeinterface() {
        let mut pool = PoolBuilder::new();
        let compare = pool.interface_methodref("test/Ordered", "compare", "(JI)I");
        #[rustfmt::skip]
        let bytes = [
            0xb8, (compare >> 8) as u8, compare as u8,
            0xb7, (compare >> 8) as u8, compare as u8,
            0xb1,
        ];
        let code = CodeBuilder::new(4, 1, &bytes).build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        let expected = VerifyErrorKind::BadConstantOperand {
            index: compare,
            expected: "Methodref",
        };

        parser.parse_opcode().unwrap();
        let err = parser.parse_method_operand(InvokeKind::Static).unwrap_err();
        assert_eq!(err.verify_kind(), Some(&expected));
        parser.parse_opcode().unwrap();
        let err = parser.parse_method_operand(InvokeKind::Special).unwrap_err();
        assert_eq!(err.verify_kind(), Some(&expected));
        assert!(err.to_string().ends_with(" @3"));
    }

    #[test]
    fn test_unknown_opcode_and_state() {
        let pool = PoolBuilder::new();
        let code = CodeBuilder::new(1, 0, &[0xca]).build();
        let mut fixture = MethodFixture::new(&pool);
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        let err = parser.parse_opcode().unwrap_err();
        assert_eq!(err.kind, VerifyErrorKind::UnknownOpcode(0xca));
        assert_eq!(err.address, Some(0));

        let code = CodeBuilder::new(1, 0, &[0x00, 0xb1]).build();
        let mut parser = fixture.parser("run", "()V", true, &code).unwrap();
        parser.parse_opcode().unwrap();
        // Not at the end yet
        assert!(parser.finish().is_err());
        parser.parse_opcode().unwrap();
        assert!(matches!(
            parser.parse_opcode().unwrap_err().kind,
            VerifyErrorKind::BadParserState(_)
        ));
    }
}
