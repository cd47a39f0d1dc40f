//! A linear scan over the bytecode that computes the operand stack depth before each
//! instruction, to find the addresses where the stack is empty.
//! Breakpoints can only be placed at those addresses, so line numbers are snapped to them.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::{
    constant_pool::{tag, ConstantPool},
    error::VerifyErrorKind,
    names, WordSize,
};

use super::{
    opcodes::{self, OpcodeInfo},
    stack_map::Target,
    types::ExceptionHandler,
};

/// The letters of the values an instruction takes from and puts on the stack
type Types = SmallVec<[u8; 8]>;

/// The category of each value on the operand stack, 2 for longs and doubles
type Categories = SmallVec<[u8; 16]>;

/// The effect of one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
struct Effect {
    pops: Types,
    pushes: Types,
    clears: bool,
}

fn category(typ: u8) -> u8 {
    match typ {
        b'L' | b'D' => 2,
        _ => 1,
    }
}

/// Parse the textual effect of an opcode
fn parse_effect(effect: &str) -> Effect {
    let (pops, pushes) = effect.split_once(':').unwrap_or(("", effect));
    let types = |part: &str| -> Types { part.bytes().filter(|c| *c != b'*').collect() };
    Effect {
        pops: types(pops),
        pushes: types(pushes),
        clears: effect.contains('*'),
    }
}

/// The stack type character of a field descriptor, `None` for void
fn descriptor_type(desc: &str) -> Option<u8> {
    Some(match desc.as_bytes().first()? {
        b'J' => b'L',
        b'D' => b'D',
        b'V' => return None,
        b'F' => b'F',
        b'L' | b'[' => b'O',
        _ => b'I',
    })
}

fn read_u16(code: &[u8], address: usize) -> Result<u16, VerifyErrorKind> {
    match code.get(address..address + 2) {
        Some(&[a, b]) => Ok(u16::from_be_bytes([a, b])),
        _ => Err(VerifyErrorKind::TruncatedOperand),
    }
}

fn read_i32(code: &[u8], address: usize) -> Result<i32, VerifyErrorKind> {
    match code.get(address..address + 4) {
        Some(&[a, b, c, d]) => Ok(i32::from_be_bytes([a, b, c, d])),
        _ => Err(VerifyErrorKind::TruncatedOperand),
    }
}

/// The length of the instruction at the address
fn instruction_length(
    code: &[u8],
    address: usize,
    opcode: u8,
    info: &OpcodeInfo,
) -> Result<usize, VerifyErrorKind> {
    if !info.is_variable_length() {
        return Ok(usize::from(info.length));
    }

    match opcode {
        opcodes::WIDE => match code.get(address + 1) {
            Some(&opcodes::IINC) => Ok(6),
            Some(_) => Ok(4),
            None => Err(VerifyErrorKind::TruncatedOperand),
        },
        opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
            // Padding to a multiple of four, relative to the start of the code
            let base = (address + 4) & !3;
            let count = if opcode == opcodes::TABLESWITCH {
                let low = i64::from(read_i32(code, base + 4)?);
                let high = i64::from(read_i32(code, base + 8)?);
                (high - low + 1).max(0) as usize + 3
            } else {
                let pairs = read_i32(code, base + 4)?.max(0) as usize;
                pairs * 2 + 2
            };
            Ok(base - address + count * 4)
        }
        _ => Err(VerifyErrorKind::UnknownOpcode(opcode)),
    }
}

/// Compute the effect of an instruction whose effect depends on its operands
fn computed_effect(
    code: &[u8],
    address: usize,
    opcode: u8,
    pool: &ConstantPool,
) -> Result<Effect, VerifyErrorKind> {
    let mut pops = Types::new();
    let mut pushes = Types::new();
    match opcode {
        opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
            let index = if opcode == opcodes::LDC {
                u16::from(*code.get(address + 1).ok_or(VerifyErrorKind::TruncatedOperand)?)
            } else {
                read_u16(code, address + 1)?
            };
            let typ = match pool.tag(index) {
                Ok(tag::INTEGER) => b'I',
                Ok(tag::FLOAT) => b'F',
                Ok(tag::LONG) => b'L',
                Ok(tag::DOUBLE) => b'D',
                Ok(tag::STRING | tag::CLASS) => b'O',
                _ => {
                    return Err(VerifyErrorKind::BadConstantOperand {
                        index,
                        expected: "loadable constant",
                    })
                }
            };
            pushes.push(typ);
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let index = read_u16(code, address + 1)?;
            let (_, descriptor) = pool.member_name_and_type(index).map_err(|_| {
                VerifyErrorKind::BadConstantOperand {
                    index,
                    expected: "Fieldref",
                }
            })?;
            let typ = descriptor_type(descriptor).unwrap_or(b'I');
            match opcode {
                opcodes::GETSTATIC => pushes.push(typ),
                opcodes::PUTSTATIC => pops.push(typ),
                opcodes::GETFIELD => {
                    pops.push(b'O');
                    pushes.push(typ);
                }
                _ => {
                    pops.push(b'O');
                    pops.push(typ);
                }
            }
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let index = read_u16(code, address + 1)?;
            let (_, descriptor) = pool.member_name_and_type(index).map_err(|_| {
                VerifyErrorKind::BadConstantOperand {
                    index,
                    expected: "Methodref",
                }
            })?;
            let parts = names::parse_method_descriptor(descriptor).map_err(|_| {
                VerifyErrorKind::BadConstantOperand {
                    index,
                    expected: "Methodref",
                }
            })?;
            if opcode != opcodes::INVOKESTATIC {
                pops.push(b'O');
            }
            pops.extend(parts.parameters.iter().filter_map(|param| descriptor_type(param)));
            pushes.extend(descriptor_type(parts.return_type));
        }
        opcodes::MULTIANEWARRAY => {
            let dimensions = *code.get(address + 3).ok_or(VerifyErrorKind::TruncatedOperand)?;
            pops.extend(std::iter::repeat(b'I').take(usize::from(dimensions)));
            pushes.push(b'O');
        }
        opcodes::WIDE => {
            let widened = *code.get(address + 1).ok_or(VerifyErrorKind::TruncatedOperand)?;
            let info = opcodes::info(widened)
                .filter(|_| opcodes::is_widenable(widened))
                .ok_or(VerifyErrorKind::BadWideOpcode(widened))?;
            return Ok(parse_effect(info.effect));
        }
        // invokedynamic has no stack effect that can be known here
        _ => {}
    }

    Ok(Effect {
        pops,
        pushes,
        clears: false,
    })
}

/// The number of values on top of the stack that make up exactly `words` words
fn values_in_words(stack: &[u8], words: u8, address: u16) -> Result<usize, VerifyErrorKind> {
    let mut total = 0;
    for (count, category) in stack.iter().rev().enumerate() {
        if total == words {
            return Ok(count);
        }
        total += category;
        if total > words {
            return Err(VerifyErrorKind::SplitStackValue(address));
        }
    }
    if total == words {
        Ok(stack.len())
    } else {
        Err(VerifyErrorKind::StackUnderflow(address))
    }
}

/// Apply one of `pop`, `pop2`, the `dup` family or `swap`.
/// These work on words, so `pop2` and `dup2` take one long or double, or two other values.
fn shuffle(stack: &mut Categories, opcode: u8, address: u16) -> Result<(), VerifyErrorKind> {
    match opcode {
        opcodes::POP | opcodes::POP2 => {
            let count = values_in_words(stack, opcode - opcodes::POP + 1, address)?;
            stack.truncate(stack.len() - count);
        }
        opcodes::SWAP => {
            let len = stack.len();
            if len < 2 {
                return Err(VerifyErrorKind::StackUnderflow(address));
            }
            if stack[len - 1] != 1 || stack[len - 2] != 1 {
                return Err(VerifyErrorKind::SplitStackValue(address));
            }
            stack.swap(len - 1, len - 2);
        }
        _ => {
            // dup, dup_x1, dup_x2, dup2, dup2_x1, dup2_x2
            let offset = opcode - opcodes::DUP;
            let (words, below) = (offset / 3 + 1, offset % 3);
            let count = values_in_words(stack, words, address)?;
            let insert_at = stack.len() - values_in_words(stack, words + below, address)?;
            let copied: Categories = stack[stack.len() - count..].iter().copied().collect();
            stack.insert_many(insert_at, copied);
        }
    }
    Ok(())
}

/// Compute the addresses of every instruction that starts with an empty operand stack.
///
/// The stack is tracked as the category of each value, taken from the stack map at branch
/// targets and a single reference (the exception) at the start of a handler. A `nop` at an
/// empty stack is merged with the instruction after it, so only the `nop` is recorded.
pub fn empty_stack_offsets(
    code: &[u8],
    pool: &ConstantPool,
    handlers: &[ExceptionHandler],
    targets: &BTreeMap<u16, Target>,
    word_size: WordSize,
) -> Result<Vec<u16>, VerifyErrorKind> {
    let mut offsets = Vec::new();
    let mut stack = Categories::new();
    let mut address = 0;
    let mut after_empty_nop = false;
    while address < code.len() {
        let address_u16 = address as u16;
        let is_landmark = if let Some(target) = targets.get(&address_u16) {
            stack.clear();
            stack.extend(
                target
                    .stack
                    .iter()
                    .map(|typ| if typ.is_category_2() { 2 } else { 1 }),
            );
            tracing::trace!(
                "Target {} starts with {} stack slots",
                address,
                target.stack_slots(word_size)
            );
            true
        } else if handlers.iter().any(|handler| handler.handler == address_u16) {
            stack.clear();
            stack.push(1);
            true
        } else {
            false
        };

        let opcode = code[address];
        // Intentional: an empty-stack `nop` shares its breakpoint with the next instruction,
        // which keeps the listings identical to the reference translator's
        if stack.is_empty() && (is_landmark || !after_empty_nop) {
            offsets.push(address_u16);
        }
        after_empty_nop = stack.is_empty() && opcode == opcodes::NOP;

        let info = opcodes::info(opcode).ok_or(VerifyErrorKind::UnknownOpcode(opcode))?;
        if (opcodes::POP..=opcodes::SWAP).contains(&opcode) {
            shuffle(&mut stack, opcode, address_u16)?;
        } else {
            let effect = if info.has_computed_effect() {
                computed_effect(code, address, opcode, pool)?
            } else {
                parse_effect(info.effect)
            };
            if stack.len() < effect.pops.len() {
                return Err(VerifyErrorKind::StackUnderflow(address_u16));
            }
            stack.truncate(stack.len() - effect.pops.len());
            if effect.clears {
                stack.clear();
            }
            stack.extend(effect.pushes.iter().map(|typ| category(*typ)));
        }

        address += instruction_length(code, address, opcode, &info)?;
    }

    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use smallvec::smallvec;

    use super::{empty_stack_offsets, parse_effect};
    use crate::{
        code::{
            stack_map::{StackMapType, Target},
            types::ExceptionHandler,
        },
        error::VerifyErrorKind,
        test_util::PoolBuilder,
        WordSize,
    };

    #[test]
    fn test_parse_effect() {
        let effect = parse_effect("LI:L");
        assert_eq!(&effect.pops[..], b"LI");
        assert_eq!(&effect.pushes[..], b"L");
        assert!(!effect.clears);
        let effect = parse_effect("O:*");
        assert_eq!(&effect.pops[..], b"O");
        assert!(effect.pushes.is_empty());
        assert!(effect.clears);
        let effect = parse_effect("");
        assert!(effect.pops.is_empty() && effect.pushes.is_empty() && !effect.clears);
    }

    #[test]
    fn test_nop_push_pop() {
        let pool = PoolBuilder::new().parse().unwrap();
        // nop; iconst_0; pop; return
        let code = [0x00, 0x03, 0x57, 0xb1];
        let offsets =
            empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), WordSize::Bits32).unwrap();
        assert_eq!(offsets, vec![0, 3]);
    }

    #[test]
    fn test_long_arithmetic() {
        let pool = PoolBuilder::new().parse().unwrap();
        // lconst_1; lconst_1; ladd; lstore_0; return
        let code = [0x0a, 0x0a, 0x61, 0x3f, 0xb1];
        for word_size in [WordSize::Bits32, WordSize::Bits64] {
            let offsets =
                empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), word_size).unwrap();
            assert_eq!(offsets, vec![0, 4]);
        }
    }

    #[test]
    fn test_word_shuffles_of_longs() {
        let pool = PoolBuilder::new().parse().unwrap();
        for word_size in [WordSize::Bits32, WordSize::Bits64] {
            // iconst_0; lconst_0; pop2; pop; return
            let code = [0x03, 0x09, 0x58, 0x57, 0xb1];
            let offsets =
                empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), word_size).unwrap();
            assert_eq!(offsets, vec![0, 4]);

            // lconst_0; dup2; ladd; lstore_0; return
            let code = [0x09, 0x5c, 0x61, 0x3f, 0xb1];
            let offsets =
                empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), word_size).unwrap();
            assert_eq!(offsets, vec![0, 4]);

            // iconst_0; lconst_0; dup2_x1; pop2; pop; pop2; return
            let code = [0x03, 0x09, 0x5d, 0x58, 0x57, 0x58, 0xb1];
            let offsets =
                empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), word_size).unwrap();
            assert_eq!(offsets, vec![0, 6]);

            // iconst_0; iconst_1; dup2; pop2; pop2; return
            let code = [0x03, 0x04, 0x5c, 0x58, 0x58, 0xb1];
            let offsets =
                empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), word_size).unwrap();
            assert_eq!(offsets, vec![0, 5]);
        }
    }

    #[test]
    fn test_stack_errors() {
        let pool = PoolBuilder::new().parse().unwrap();
        // pop; return
        assert_eq!(
            empty_stack_offsets(&[0x57, 0xb1], &pool, &[], &BTreeMap::new(), WordSize::Bits32),
            Err(VerifyErrorKind::StackUnderflow(0))
        );
        // iconst_0; iadd; return
        assert_eq!(
            empty_stack_offsets(
                &[0x03, 0x60, 0xb1],
                &pool,
                &[],
                &BTreeMap::new(),
                WordSize::Bits32
            ),
            Err(VerifyErrorKind::StackUnderflow(1))
        );
        // lconst_0; pop; return
        assert_eq!(
            empty_stack_offsets(
                &[0x09, 0x57, 0xb1],
                &pool,
                &[],
                &BTreeMap::new(),
                WordSize::Bits64
            ),
            Err(VerifyErrorKind::SplitStackValue(1))
        );
        // iconst_0; lconst_0; swap; return
        assert_eq!(
            empty_stack_offsets(
                &[0x03, 0x09, 0x5f, 0xb1],
                &pool,
                &[],
                &BTreeMap::new(),
                WordSize::Bits32
            ),
            Err(VerifyErrorKind::SplitStackValue(2))
        );
    }

    #[test]
    fn test_invoke_and_field_effects() {
        let mut builder = PoolBuilder::new();
        let out = builder.fieldref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let println = builder.methodref("java/io/PrintStream", "println", "(J)V");
        let pool = builder.parse().unwrap();
        #[rustfmt::skip]
        let code = [
            0xb2, (out >> 8) as u8, out as u8,
            0x0a,
            0xb6, (println >> 8) as u8, println as u8,
            0xb1,
        ];
        let offsets =
            empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), WordSize::Bits32).unwrap();
        assert_eq!(offsets, vec![0, 7]);
    }

    #[test]
    fn test_handlers_and_targets() {
        let pool = PoolBuilder::new().parse().unwrap();
        // 0: iconst_0, 1: ifeq 6, 4: iconst_1, 5: athrow, 6: return, 7: astore_0, 8: return
        let code = [0x03, 0x99, 0x00, 0x05, 0x04, 0xbf, 0xb1, 0x4b, 0xb1];
        let handlers = [ExceptionHandler {
            start: 0,
            end: 6,
            handler: 7,
            catch_type: None,
        }];
        let mut targets = BTreeMap::new();
        targets.insert(
            6,
            Target {
                address: 6,
                locals: smallvec![],
                stack: smallvec![],
            },
        );
        let offsets =
            empty_stack_offsets(&code, &pool, &handlers, &targets, WordSize::Bits32).unwrap();
        assert_eq!(offsets, vec![0, 4, 6, 8]);

        // A target with something on the stack is not empty
        targets.get_mut(&6).unwrap().stack.push(StackMapType::Integer);
        let offsets =
            empty_stack_offsets(&code, &pool, &handlers, &targets, WordSize::Bits32).unwrap();
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[test]
    fn test_switch_and_wide_lengths() {
        let pool = PoolBuilder::new().parse().unwrap();
        #[rustfmt::skip]
        let code = [
            // 0: iconst_0
            0x03,
            // 1: tableswitch, padded to 4, default, low 0, high 0, one offset
            0xaa, 0, 0,
            0, 0, 0, 19,
            0, 0, 0, 0,
            0, 0, 0, 0,
            0, 0, 0, 19,
            // 20: wide iinc 0 by 1
            0xc4, 0x84, 0, 0, 0, 1,
            // 26: return
            0xb1,
        ];
        let offsets =
            empty_stack_offsets(&code, &pool, &[], &BTreeMap::new(), WordSize::Bits32).unwrap();
        assert_eq!(offsets, vec![0, 20, 26]);

        assert!(empty_stack_offsets(&[0xca], &pool, &[], &BTreeMap::new(), WordSize::Bits32)
            .is_err());
    }
}
