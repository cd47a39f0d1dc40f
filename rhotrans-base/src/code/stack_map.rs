//! Stack map attributes, which give the type state at every branch target.
//!
//! Two forms are read: the CLDC `StackMap` attribute, which lists every frame in full, and the
//! `StackMapTable` attribute, whose frames are deltas from the previous frame.
//! Both are kept in the compact form, where a long or double is a single entry.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::{
    constant_pool::ConstantPool,
    error::{TranslateError, VerifyError, VerifyErrorKind},
    id::ClassId,
    reader::ClassFileReader,
    symbols::SymbolTable,
    WordSize,
};

use super::types::UninitializedObject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    /// `this` in a constructor before the super constructor has been called
    UninitializedThis,
    Object(ClassId),
    /// An object made by the `new` instruction at the address, which has not been initialized
    Uninitialized(u16),
}
impl StackMapType {
    /// The number of slots the type takes on the operand stack
    #[must_use]
    pub fn stack_slots(&self, word_size: WordSize) -> usize {
        if self.is_category_2() {
            word_size.double_word_slots()
        } else {
            1
        }
    }

    #[must_use]
    pub fn is_category_2(&self) -> bool {
        matches!(self, StackMapType::Double | StackMapType::Long)
    }

    /// The type a value of the given (loaded) class has in a frame
    pub fn from_class<S: SymbolTable + ?Sized>(table: &S, id: ClassId) -> StackMapType {
        match table.class_name(id) {
            Some("boolean" | "byte" | "char" | "short" | "int") => StackMapType::Integer,
            Some("float") => StackMapType::Float,
            Some("long") => StackMapType::Long,
            Some("double") => StackMapType::Double,
            _ => StackMapType::Object(id),
        }
    }
}

/// The type state at an address that can be branched to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: u16,
    pub locals: SmallVec<[StackMapType; 8]>,
    pub stack: SmallVec<[StackMapType; 4]>,
}
impl Target {
    /// The depth of the operand stack at the target
    #[must_use]
    pub fn stack_slots(&self, word_size: WordSize) -> usize {
        self.stack.iter().map(|typ| typ.stack_slots(word_size)).sum()
    }
}

/// The JVM slot count of a list of types, where longs and doubles always take two
fn jvm_slots(types: &[StackMapType]) -> usize {
    types
        .iter()
        .map(|typ| if typ.is_category_2() { 2 } else { 1 })
        .sum()
}

/// The locals at the start of a method, before any instruction has run
pub fn initial_locals<S: SymbolTable + ?Sized>(
    table: &S,
    class: ClassId,
    is_constructor: bool,
    is_static: bool,
    parameters: &[ClassId],
) -> SmallVec<[StackMapType; 8]> {
    let mut locals = SmallVec::with_capacity(parameters.len() + 1);
    if !is_static {
        // Object's constructor has no super constructor to call
        if is_constructor && table.class_name(class) != Some("java.lang.Object") {
            locals.push(StackMapType::UninitializedThis);
        } else {
            locals.push(StackMapType::Object(class));
        }
    }
    locals.extend(
        parameters
            .iter()
            .map(|param| StackMapType::from_class(table, *param)),
    );
    locals
}

mod item {
    pub const TOP: u8 = 0;
    pub const INTEGER: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const LONG: u8 = 4;
    pub const NULL: u8 = 5;
    pub const UNINITIALIZED_THIS: u8 = 6;
    pub const OBJECT: u8 = 7;
    pub const UNINITIALIZED: u8 = 8;
}

/// The start of the `same_locals_1_stack_item` frames, used for computing the offset delta
/// since it is encoded in the frame type
const SAME_LOCALS_1_ITEM_START: u8 = 64;

/// Reads either kind of stack map attribute for one method
pub(crate) struct StackMapParser<'p, S: SymbolTable + ?Sized> {
    pub pool: &'p mut ConstantPool,
    pub table: &'p mut S,
    pub uninitialized: &'p mut BTreeMap<u16, UninitializedObject>,
    pub code_length: u16,
    pub max_locals: u16,
    pub max_stack: u16,
}
impl<'p, S: SymbolTable + ?Sized> StackMapParser<'p, S> {
    /// Parse the body of a CLDC `StackMap` attribute
    pub fn parse_stack_map(
        &mut self,
        reader: &mut ClassFileReader<'_>,
    ) -> Result<BTreeMap<u16, Target>, TranslateError> {
        let count = reader.read_u16("StackMap number_of_entries")?;
        let mut targets = BTreeMap::new();
        let mut previous = None;
        for _ in 0..count {
            let address = reader.read_u16("StackMap offset")?;
            let local_count = reader.read_u16("StackMap number_of_locals")?;
            let mut locals = SmallVec::new();
            for _ in 0..local_count {
                locals.push(self.verification_type(reader)?);
            }
            let stack_count = reader.read_u16("StackMap number_of_stack_items")?;
            let mut stack = SmallVec::new();
            for _ in 0..stack_count {
                stack.push(self.verification_type(reader)?);
            }

            let target = Target {
                address,
                locals,
                stack,
            };
            self.check_target(&target, previous)?;
            previous = Some(address);
            targets.insert(address, target);
        }

        Ok(targets)
    }

    /// Parse the body of a `StackMapTable` attribute, expanding each frame against the one
    /// before it
    pub fn parse_stack_map_table(
        &mut self,
        reader: &mut ClassFileReader<'_>,
        initial_locals: SmallVec<[StackMapType; 8]>,
    ) -> Result<BTreeMap<u16, Target>, TranslateError> {
        let count = reader.read_u16("StackMapTable number_of_entries")?;
        let mut targets = BTreeMap::new();
        let mut locals = initial_locals;
        let mut previous: Option<u16> = None;
        for _ in 0..count {
            let frame_type = reader.read_u8("StackMapTable frame_type")?;
            let mut stack = SmallVec::new();
            let delta = match frame_type {
                0..=63 => u16::from(frame_type),
                64..=127 => {
                    stack.push(self.verification_type(reader)?);
                    u16::from(frame_type - SAME_LOCALS_1_ITEM_START)
                }
                247 => {
                    let delta = reader.read_u16("StackMapTable offset_delta")?;
                    stack.push(self.verification_type(reader)?);
                    delta
                }
                248..=250 => {
                    let delta = reader.read_u16("StackMapTable offset_delta")?;
                    let chop = usize::from(251 - frame_type);
                    if chop > locals.len() {
                        return Err(VerifyError::new(VerifyErrorKind::StackMapFrameTooLarge).into());
                    }
                    locals.truncate(locals.len() - chop);
                    delta
                }
                251 => reader.read_u16("StackMapTable offset_delta")?,
                252..=254 => {
                    let delta = reader.read_u16("StackMapTable offset_delta")?;
                    for _ in 0..(frame_type - 251) {
                        locals.push(self.verification_type(reader)?);
                    }
                    delta
                }
                255 => {
                    let delta = reader.read_u16("StackMapTable offset_delta")?;
                    let local_count = reader.read_u16("StackMapTable number_of_locals")?;
                    locals.clear();
                    for _ in 0..local_count {
                        locals.push(self.verification_type(reader)?);
                    }
                    let stack_count = reader.read_u16("StackMapTable number_of_stack_items")?;
                    for _ in 0..stack_count {
                        stack.push(self.verification_type(reader)?);
                    }
                    delta
                }
                // 128 to 246 are reserved
                _ => {
                    return Err(
                        VerifyError::new(VerifyErrorKind::BadStackMapType(frame_type)).into(),
                    )
                }
            };

            // The first frame is at the delta, every frame after is one past the sum
            let address = match previous {
                None => u32::from(delta),
                Some(previous) => u32::from(previous) + u32::from(delta) + 1,
            };
            let address = u16::try_from(address).map_err(|_| {
                VerifyError::new(VerifyErrorKind::BadStackMapOffset(address))
            })?;

            let target = Target {
                address,
                locals: locals.clone(),
                stack,
            };
            self.check_target(&target, previous)?;
            previous = Some(address);
            targets.insert(address, target);
        }

        Ok(targets)
    }

    fn check_target(&self, target: &Target, previous: Option<u16>) -> Result<(), VerifyError> {
        let in_order = previous.map_or(true, |previous| target.address > previous);
        if !in_order || target.address >= self.code_length {
            return Err(VerifyError::new(VerifyErrorKind::BadStackMapOffset(
                u32::from(target.address),
            )));
        }

        if jvm_slots(&target.locals) > usize::from(self.max_locals)
            || jvm_slots(&target.stack) > usize::from(self.max_stack)
        {
            return Err(VerifyError::new(VerifyErrorKind::StackMapFrameTooLarge));
        }

        Ok(())
    }

    fn verification_type(
        &mut self,
        reader: &mut ClassFileReader<'_>,
    ) -> Result<StackMapType, TranslateError> {
        let tag = reader.read_u8("verification_type_info tag")?;
        Ok(match tag {
            item::TOP => StackMapType::Top,
            item::INTEGER => StackMapType::Integer,
            item::FLOAT => StackMapType::Float,
            item::DOUBLE => StackMapType::Double,
            item::LONG => StackMapType::Long,
            item::NULL => StackMapType::Null,
            item::UNINITIALIZED_THIS => StackMapType::UninitializedThis,
            item::OBJECT => {
                let index = reader.read_u16("verification_type_info cpool_index")?;
                StackMapType::Object(self.pool.get_klass(index, self.table)?)
            }
            item::UNINITIALIZED => {
                let address = reader.read_u16("verification_type_info offset")?;
                if address >= self.code_length {
                    return Err(VerifyError::new(VerifyErrorKind::BadStackMapOffset(
                        u32::from(address),
                    ))
                    .into());
                }
                // The `new` may come later in the code, it fills in the type once parsed
                self.uninitialized
                    .entry(address)
                    .or_insert(UninitializedObject {
                        address,
                        initialized_type: None,
                    });
                StackMapType::Uninitialized(address)
            }
            _ => return Err(VerifyError::new(VerifyErrorKind::BadStackMapType(tag)).into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use smallvec::smallvec;

    use super::{initial_locals, StackMapParser, StackMapType, Target};
    use crate::{
        error::VerifyErrorKind,
        reader::ClassFileReader,
        symbols::SymbolTable,
        test_util::{bootstrap_universe, PoolBuilder},
        WordSize,
    };

    #[test]
    fn test_parse_stack_map() {
        let mut universe = bootstrap_universe();
        let mut builder = PoolBuilder::new();
        let string = builder.class("java/lang/String");
        let mut pool = builder.parse().unwrap();
        let mut uninitialized = BTreeMap::new();

        #[rustfmt::skip]
        let body = [
            0, 2,
            // At 3: locals [int, long], stack [String]
            0, 3, 0, 2, 1, 4, 0, 1, 7, (string >> 8) as u8, string as u8,
            // At 9: no locals, stack [uninitialized from 6, null]
            0, 9, 0, 0, 0, 2, 8, 0, 6, 5,
        ];
        let mut parser = StackMapParser {
            pool: &mut pool,
            table: &mut universe,
            uninitialized: &mut uninitialized,
            code_length: 12,
            max_locals: 3,
            max_stack: 2,
        };
        let targets = parser
            .parse_stack_map(&mut ClassFileReader::new(&body))
            .unwrap();

        let string_id = universe.class_id("java.lang.String");
        assert_eq!(
            targets.get(&3),
            Some(&Target {
                address: 3,
                locals: smallvec![StackMapType::Integer, StackMapType::Long],
                stack: smallvec![StackMapType::Object(string_id)],
            })
        );
        let at_9 = targets.get(&9).unwrap();
        assert_eq!(at_9.stack_slots(WordSize::Bits32), 2);
        assert_eq!(at_9.stack[0], StackMapType::Uninitialized(6));
        // Pre-created, waiting for the `new`
        assert_eq!(uninitialized.get(&6).unwrap().initialized_type, None);
    }

    #[test]
    fn test_stack_map_errors() {
        let mut universe = bootstrap_universe();
        let mut pool = PoolBuilder::new().parse().unwrap();
        let mut uninitialized = BTreeMap::new();
        let mut parser = StackMapParser {
            pool: &mut pool,
            table: &mut universe,
            uninitialized: &mut uninitialized,
            code_length: 12,
            max_locals: 1,
            max_stack: 1,
        };

        let cases: [(&[u8], VerifyErrorKind); 5] = [
            // Out of order
            (
                &[0, 2, 0, 5, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0],
                VerifyErrorKind::BadStackMapOffset(4),
            ),
            // Past the code
            (&[0, 1, 0, 12, 0, 0, 0, 0], VerifyErrorKind::BadStackMapOffset(12)),
            (&[0, 1, 0, 1, 0, 1, 9, 0, 0], VerifyErrorKind::BadStackMapType(9)),
            // A long needs two locals
            (&[0, 1, 0, 1, 0, 1, 4, 0, 0], VerifyErrorKind::StackMapFrameTooLarge),
            (&[0, 1, 0, 1, 0, 0, 0, 2, 1, 1], VerifyErrorKind::StackMapFrameTooLarge),
        ];
        for (body, expected) in cases {
            let err = parser
                .parse_stack_map(&mut ClassFileReader::new(body))
                .unwrap_err();
            assert_eq!(err.verify_kind(), Some(&expected));
        }
    }

    #[test]
    fn test_parse_stack_map_table() {
        let mut universe = bootstrap_universe();
        let mut pool = PoolBuilder::new().parse().unwrap();
        let mut uninitialized = BTreeMap::new();
        let object = universe.class_id("java.lang.Object");
        let int = universe.class_id("int");
        let initial = initial_locals(&universe, object, false, false, &[int]);
        assert_eq!(
            initial.as_slice(),
            &[StackMapType::Object(object), StackMapType::Integer]
        );

        #[rustfmt::skip]
        let body = [
            0, 5,
            // same at 4
            4,
            // same_locals_1_stack_item at 4 + 2 + 1 = 7, stack [int]
            66, 1,
            // append 1 local at 7 + 3 + 1 = 11
            252, 0, 3, 2,
            // chop 2 at 11 + 1 + 1 = 13
            249, 0, 1,
            // full at 13 + 2 + 1 = 16, locals [long], stack [null]
            255, 0, 2, 0, 1, 4, 0, 1, 5,
        ];
        let mut parser = StackMapParser {
            pool: &mut pool,
            table: &mut universe,
            uninitialized: &mut uninitialized,
            code_length: 20,
            max_locals: 3,
            max_stack: 2,
        };
        let targets = parser
            .parse_stack_map_table(&mut ClassFileReader::new(&body), initial)
            .unwrap();

        let addresses: Vec<u16> = targets.keys().copied().collect();
        assert_eq!(addresses, vec![4, 7, 11, 13, 16]);
        assert_eq!(targets[&4].locals.len(), 2);
        assert!(targets[&4].stack.is_empty());
        assert_eq!(targets[&7].stack.as_slice(), &[StackMapType::Integer]);
        assert_eq!(
            targets[&11].locals.as_slice(),
            &[
                StackMapType::Object(object),
                StackMapType::Integer,
                StackMapType::Float
            ]
        );
        assert_eq!(
            targets[&13].locals.as_slice(),
            &[StackMapType::Object(object)]
        );
        assert_eq!(targets[&16].locals.as_slice(), &[StackMapType::Long]);
        assert_eq!(targets[&16].stack.as_slice(), &[StackMapType::Null]);
        assert_eq!(targets[&16].stack_slots(WordSize::Bits64), 1);
    }

    #[test]
    fn test_initial_locals_for_constructor() {
        let mut universe = bootstrap_universe();
        let object = universe.class_id("java.lang.Object");
        let string = universe.class_id("java.lang.String");
        let long = universe.class_id("long");
        assert_eq!(
            initial_locals(&universe, string, true, false, &[long]).as_slice(),
            &[StackMapType::UninitializedThis, StackMapType::Long]
        );
        assert_eq!(
            initial_locals(&universe, object, true, false, &[]).as_slice(),
            &[StackMapType::Object(object)]
        );
        assert!(initial_locals(&universe, string, false, true, &[]).is_empty());
    }
}
