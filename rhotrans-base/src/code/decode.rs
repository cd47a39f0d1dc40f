//! Decoding every instruction of a method through a [`CodeParser`], and handing the result to
//! a [`TranslationSink`].

use std::{fmt, io::Write};

use smallvec::SmallVec;

use crate::{
    class_file::ClassFile,
    constant_pool::{load_checked, tag, Constant},
    error::{SinkError, TranslateError, VerifyErrorKind},
    id::{ClassId, FieldId, MethodId},
    symbols::SymbolTable,
    Config,
};

use super::{
    opcodes::{
        self, ALOAD, ALOAD_3, ANEWARRAY, ASTORE, ASTORE_3, BIPUSH, CHECKCAST, DLOAD, DSTORE,
        FLOAD, FSTORE, GETFIELD, GETSTATIC, GOTO_W, IFEQ, IFNONNULL, IFNULL, IINC, ILOAD, ILOAD_0,
        INSTANCEOF, INVOKEDYNAMIC, INVOKEINTERFACE, INVOKESPECIAL, INVOKESTATIC, INVOKEVIRTUAL,
        ISTORE, ISTORE_0, JSR, JSR_W, LDC, LDC2_W, LDC_W, LLOAD, LOOKUPSWITCH, LSTORE,
        MULTIANEWARRAY, NEW, NEWARRAY, PUTFIELD, PUTSTATIC, RET, SIPUSH, TABLESWITCH, WIDE,
    },
    pseudo::PseudoOpcode,
    types::{InvokeKind, LdcKind, LocalVariable},
    CodeParser, MethodContext,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// An immediate integer, from `bipush`, `sipush` or the increment of `iinc`
    Int(i32),
    Local(u16),
    Constant(Constant),
    Class(ClassId, String),
    Field(FieldId, String),
    Method(MethodId, String),
    /// The destination address of a branch
    Branch(u16),
    Dimensions(u8),
    /// An unresolved constant pool index, used by `invokedynamic`
    Index(u16),
    TableSwitch {
        default: u16,
        low: i32,
        targets: Vec<u16>,
    },
    LookupSwitch {
        default: u16,
        pairs: Vec<(i32, u16)>,
    },
}
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Int(value) => write!(f, "{}", value),
            Operand::Local(index) => write!(f, "[{}]", index),
            Operand::Constant(constant) => match constant {
                Constant::Integer(v) => write!(f, "{}", v),
                Constant::Float(v) => write!(f, "{}f", v),
                Constant::Long(v) => write!(f, "{}L", v),
                Constant::Double(v) => write!(f, "{}d", v),
                Constant::String(v) => write!(f, "{:?}", v),
                Constant::Class(id) => write!(f, "{:?}", id),
            },
            Operand::Class(_, name) | Operand::Field(_, name) | Operand::Method(_, name) => {
                f.write_str(name)
            }
            Operand::Branch(address) => write!(f, "@{}", address),
            Operand::Dimensions(dimensions) => write!(f, "dims {}", dimensions),
            Operand::Index(index) => write!(f, "#{}", index),
            Operand::TableSwitch {
                default,
                low,
                targets,
            } => {
                f.write_str("{")?;
                for (i, target) in targets.iter().enumerate() {
                    let key = i64::from(*low) + i as i64;
                    write!(f, " {}: @{}", key, target)?;
                }
                write!(f, " default: @{} }}", default)
            }
            Operand::LookupSwitch { default, pairs } => {
                f.write_str("{")?;
                for (key, target) in pairs {
                    write!(f, " {}: @{}", key, target)?;
                }
                write!(f, " default: @{} }}", default)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: u16,
    /// For a `wide` instruction this is the opcode that was widened
    pub opcode: u8,
    pub wide: bool,
    /// The pseudo opcodes that come before this instruction
    pub pseudo: SmallVec<[PseudoOpcode; 4]>,
    pub operands: SmallVec<[Operand; 2]>,
}
impl Instruction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        opcodes::name(self.opcode)
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pseudo in &self.pseudo {
            writeln!(f, "        {}", pseudo)?;
        }
        write!(f, "  {:>5}: ", self.address)?;
        if self.wide {
            f.write_str("wide ")?;
        }
        f.write_str(self.name())?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerListing {
    pub start: u16,
    pub end: u16,
    pub handler: u16,
    /// `None` for a handler that catches everything
    pub catch_type: Option<String>,
}

/// Everything the parser gave out for one method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodListing {
    pub max_stack: u16,
    pub max_locals: u16,
    pub handlers: Vec<HandlerListing>,
    pub instructions: Vec<Instruction>,
    /// The pseudo opcodes at the address just past the last instruction
    pub end_pseudo: SmallVec<[PseudoOpcode; 4]>,
    /// Packed as `(address << 16) | line`
    pub line_numbers: Vec<u32>,
    pub local_variables: Vec<LocalVariable>,
    pub empty_stack_offsets: Vec<u16>,
}
impl fmt::Display for MethodListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  max_stack {}, max_locals {}",
            self.max_stack, self.max_locals
        )?;
        for (i, handler) in self.handlers.iter().enumerate() {
            writeln!(
                f,
                "  handler #{}: [{}, {}) -> {} {}",
                i,
                handler.start,
                handler.end,
                handler.handler,
                handler.catch_type.as_deref().unwrap_or("any")
            )?;
        }
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        for pseudo in &self.end_pseudo {
            writeln!(f, "        {}", pseudo)?;
        }
        if !self.line_numbers.is_empty() {
            f.write_str("  lines:")?;
            for entry in &self.line_numbers {
                write!(f, " {}:{}", entry >> 16, entry & 0xFFFF)?;
            }
            writeln!(f)?;
        }
        for local in &self.local_variables {
            writeln!(
                f,
                "  local [{}] {} {} @{}+{}",
                local.slot, local.name, local.descriptor, local.start_address, local.length
            )?;
        }
        Ok(())
    }
}

fn class_operand<S: SymbolTable + ?Sized>(parser: &CodeParser<'_, S>, id: ClassId) -> Operand {
    Operand::Class(id, parser.symbols().display_name(id))
}

fn field_operand<S: SymbolTable + ?Sized>(parser: &CodeParser<'_, S>, id: FieldId) -> Operand {
    let table = parser.symbols();
    let name = table.field(id).map_or_else(
        || format!("{:?}", id),
        |field| format!("{}.{}", table.display_name(field.declaring_class), field.name),
    );
    Operand::Field(id, name)
}

fn method_operand<S: SymbolTable + ?Sized>(parser: &CodeParser<'_, S>, id: MethodId) -> Operand {
    let table = parser.symbols();
    let name = table.method(id).map_or_else(
        || format!("{:?}", id),
        |method| format!("{}.{}", table.display_name(method.declaring_class), method.name),
    );
    Operand::Method(id, name)
}

fn parse_table_switch<S: SymbolTable + ?Sized>(
    parser: &mut CodeParser<'_, S>,
) -> Result<Operand, TranslateError> {
    parser.parse_switch_padding()?;
    let default = parser.parse_branch_operand(true)?;
    let low = parser.parse_int_operand()?;
    let high = parser.parse_int_operand()?;
    let count = i64::from(high) - i64::from(low) + 1;
    // Each offset takes four bytes, so a larger count could never fit in the code
    if count <= 0 || count > i64::from(parser.code_length()) {
        return Err(parser.verify_error(VerifyErrorKind::BadSwitch).into());
    }

    let mut targets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        targets.push(parser.parse_branch_operand(true)?);
    }

    Ok(Operand::TableSwitch {
        default,
        low,
        targets,
    })
}

fn parse_lookup_switch<S: SymbolTable + ?Sized>(
    parser: &mut CodeParser<'_, S>,
) -> Result<Operand, TranslateError> {
    parser.parse_switch_padding()?;
    let default = parser.parse_branch_operand(true)?;
    let count = parser.parse_int_operand()?;
    if count < 0 || i64::from(count) > i64::from(parser.code_length()) {
        return Err(parser.verify_error(VerifyErrorKind::BadSwitch).into());
    }

    let mut pairs: Vec<(i32, u16)> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = parser.parse_int_operand()?;
        if pairs.last().map_or(false, |(last, _)| *last >= key) {
            return Err(parser.verify_error(VerifyErrorKind::BadSwitch).into());
        }
        let target = parser.parse_branch_operand(true)?;
        pairs.push((key, target));
    }

    Ok(Operand::LookupSwitch { default, pairs })
}

fn parse_invoke_dynamic<S: SymbolTable + ?Sized>(
    parser: &mut CodeParser<'_, S>,
) -> Result<Operand, TranslateError> {
    let index = parser.parse_unsigned_short_operand()?;
    if parser.constant_pool().tag(index).ok() != Some(tag::INVOKE_DYNAMIC) {
        return Err(parser
            .verify_error(VerifyErrorKind::BadConstantOperand {
                index,
                expected: "InvokeDynamic",
            })
            .into());
    }
    if parser.parse_unsigned_short_operand()? != 0 {
        return Err(parser
            .verify_error(VerifyErrorKind::BadOperand("invokedynamic zero bytes"))
            .into());
    }
    Ok(Operand::Index(index))
}

fn parse_multi_new_array<S: SymbolTable + ?Sized>(
    parser: &mut CodeParser<'_, S>,
    operands: &mut SmallVec<[Operand; 2]>,
) -> Result<(), TranslateError> {
    let class = parser.parse_class_operand()?;
    let dimensions = parser.parse_unsigned_byte_operand()?;
    let array_dimensions = parser
        .symbols()
        .class_name(class)
        .map_or(0, |name| name.bytes().take_while(|c| *c == b'[').count());
    if dimensions == 0 || usize::from(dimensions) > array_dimensions {
        return Err(parser
            .verify_error(VerifyErrorKind::BadOperand("multianewarray dimensions"))
            .into());
    }
    operands.push(class_operand(parser, class));
    operands.push(Operand::Dimensions(dimensions));
    Ok(())
}

fn is_two_word_local(opcode: u8) -> bool {
    matches!(opcode, LLOAD | DLOAD | LSTORE | DSTORE)
}

/// Parse the operands of the opcode that was just parsed into the instruction
fn parse_operands<S: SymbolTable + ?Sized>(
    parser: &mut CodeParser<'_, S>,
    instruction: &mut Instruction,
) -> Result<(), TranslateError> {
    let operands = &mut instruction.operands;
    match instruction.opcode {
        BIPUSH => operands.push(Operand::Int(i32::from(parser.parse_byte_operand()?))),
        SIPUSH => operands.push(Operand::Int(i32::from(parser.parse_short_operand()?))),
        LDC | LDC_W | LDC2_W => {
            let kind = match instruction.opcode {
                LDC => LdcKind::Ldc,
                LDC_W => LdcKind::LdcW,
                _ => LdcKind::Ldc2W,
            };
            let operand = match parser.parse_constant_pool_operand(kind)? {
                Constant::Class(id) => class_operand(parser, id),
                constant => Operand::Constant(constant),
            };
            operands.push(operand);
        }
        ILOAD | LLOAD | FLOAD | DLOAD | ALOAD | ISTORE | LSTORE | FSTORE | DSTORE | ASTORE
        | RET => {
            let is_two_word = is_two_word_local(instruction.opcode);
            operands.push(Operand::Local(
                parser.parse_local_variable_operand(false, is_two_word)?,
            ));
        }
        IINC => {
            operands.push(Operand::Local(
                parser.parse_local_variable_operand(false, false)?,
            ));
            operands.push(Operand::Int(i32::from(parser.parse_byte_operand()?)));
        }
        IFEQ..=JSR | IFNULL | IFNONNULL => {
            operands.push(Operand::Branch(parser.parse_branch_operand(false)?));
        }
        GOTO_W | JSR_W => operands.push(Operand::Branch(parser.parse_branch_operand(true)?)),
        TABLESWITCH => operands.push(parse_table_switch(parser)?),
        LOOKUPSWITCH => operands.push(parse_lookup_switch(parser)?),
        GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
            let is_static = matches!(instruction.opcode, GETSTATIC | PUTSTATIC);
            let field = parser.parse_field_operand(is_static)?;
            operands.push(field_operand(parser, field));
        }
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
            let kind = match instruction.opcode {
                INVOKEVIRTUAL => InvokeKind::Virtual,
                INVOKESPECIAL => InvokeKind::Special,
                INVOKESTATIC => InvokeKind::Static,
                _ => InvokeKind::Interface,
            };
            let method = parser.parse_method_operand(kind)?;
            operands.push(method_operand(parser, method));
        }
        INVOKEDYNAMIC => operands.push(parse_invoke_dynamic(parser)?),
        NEW => {
            let class = parser.parse_new_operand()?;
            operands.push(class_operand(parser, class));
        }
        NEWARRAY => {
            let class = parser.parse_new_array_operand()?;
            operands.push(class_operand(parser, class));
        }
        ANEWARRAY | CHECKCAST | INSTANCEOF => {
            let class = parser.parse_class_operand()?;
            operands.push(class_operand(parser, class));
        }
        MULTIANEWARRAY => parse_multi_new_array(parser, operands)?,
        WIDE => {
            let opcode = parser.parse_wide_opcode()?;
            instruction.opcode = opcode;
            instruction.wide = true;
            operands.push(Operand::Local(
                parser.parse_local_variable_operand(true, is_two_word_local(opcode))?,
            ));
            if opcode == IINC {
                operands.push(Operand::Int(i32::from(parser.parse_short_operand()?)));
            }
        }
        // The index is part of the opcode, in groups of four for int, long, float, double and
        // reference
        ILOAD_0..=ALOAD_3 | ISTORE_0..=ASTORE_3 => {
            let opcode = instruction.opcode;
            let first = if opcode <= ALOAD_3 { ILOAD_0 } else { ISTORE_0 };
            let offset = opcode - first;
            let is_two_word = matches!(offset / 4, 1 | 3);
            parser.check_local_variable_index(u16::from(offset % 4), is_two_word)?;
        }
        // Everything else is a single byte
        _ => {}
    }

    Ok(())
}

/// Decode every instruction of the method and run the checks that need the whole method
pub fn decode_method<S: SymbolTable + ?Sized>(
    parser: &mut CodeParser<'_, S>,
) -> Result<MethodListing, TranslateError> {
    let mut instructions = Vec::new();
    while !parser.at_eof() {
        let pseudo = parser.get_last_pseudo_opcodes();
        let address = parser.cursor_address();
        let opcode = parser.parse_opcode()?;
        let mut instruction = Instruction {
            address,
            opcode,
            wide: false,
            pseudo,
            operands: SmallVec::new(),
        };
        parse_operands(parser, &mut instruction)?;
        instructions.push(instruction);
    }
    let end_pseudo = parser.get_last_pseudo_opcodes();

    parser.finish()?;

    let handlers = parser
        .exception_handlers()
        .iter()
        .map(|handler| HandlerListing {
            start: handler.start,
            end: handler.end,
            handler: handler.handler,
            catch_type: handler
                .catch_type
                .map(|id| parser.symbols().display_name(id)),
        })
        .collect();
    let line_numbers = parser.get_line_number_table()?;
    let empty_stack_offsets = parser.empty_stack_offsets()?.to_vec();

    Ok(MethodListing {
        max_stack: parser.max_stack(),
        max_locals: parser.max_locals(),
        handlers,
        instructions,
        end_pseudo,
        line_numbers,
        local_variables: parser.get_local_variable_table(),
        empty_stack_offsets,
    })
}

/// Receives the translated methods of a class
pub trait TranslationSink {
    fn begin_class(&mut self, _class: &str) -> Result<(), SinkError> {
        Ok(())
    }

    fn method(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        listing: &MethodListing,
    ) -> Result<(), SinkError>;
}

/// Writes listings as text
pub struct ListingWriter<W: Write> {
    out: W,
}
impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> ListingWriter<W> {
        ListingWriter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
impl<W: Write> TranslationSink for ListingWriter<W> {
    fn begin_class(&mut self, class: &str) -> Result<(), SinkError> {
        writeln!(self.out, "class {}", class)?;
        Ok(())
    }

    fn method(
        &mut self,
        _class: &str,
        name: &str,
        descriptor: &str,
        listing: &MethodListing,
    ) -> Result<(), SinkError> {
        writeln!(self.out, "method {}{}", name, descriptor)?;
        write!(self.out, "{}", listing)?;
        Ok(())
    }
}

/// Parse a class file and decode every method that has code, handing each to the sink.
/// Returns the number of methods that were translated.
pub fn translate_class<S, K>(
    data: &[u8],
    table: &mut S,
    config: &Config,
    sink: &mut K,
) -> Result<usize, TranslateError>
where
    S: SymbolTable + ?Sized,
    K: TranslationSink + ?Sized,
{
    let ClassFile {
        id,
        methods,
        mut constant_pool,
        ..
    } = ClassFile::parse(data, table)?;
    // Members of the class are resolved against the symbol table, so it has to be there too
    load_checked(table, id)?;

    let class_name = table.display_name(id);
    sink.begin_class(&class_name)?;

    let mut count = 0;
    for method in &methods {
        let code = match &method.code {
            Some(code) => code,
            None => continue,
        };
        let context = MethodContext {
            class: id,
            name: &method.name,
            descriptor: &method.descriptor,
            is_static: method.is_static(),
        };

        let _span = tracing::debug_span!("method", name = %method.name).entered();
        let listing = CodeParser::new(code, &mut constant_pool, table, config, context)
            .and_then(|mut parser| decode_method(&mut parser))
            .map_err(|err| {
                tracing::warn!(
                    "Failed to translate {}.{}{}: {}",
                    class_name,
                    method.name,
                    method.descriptor,
                    err
                );
                err
            })?;
        sink.method(&class_name, &method.name, &method.descriptor, &listing)?;
        count += 1;
    }

    tracing::info!("Translated {} methods of {}", count, class_name);
    Ok(count)
}
