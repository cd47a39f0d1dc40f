//! The constant pool of a class file and lazy resolution of the symbolic references in it.
//!
//! Loading happens in two passes. The first reads each entry's payload as it is in the file,
//! with composite entries only holding indices. The second pass turns class and string entries
//! into their text and checks that every member reference points at a class and a
//! name-and-type of the right shape.
//!
//! Resolution replaces entries in place. An entry goes from unresolved to resolved exactly
//! once, after that every lookup of the index returns the same handle.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::{
    error::{ClassFormatError, LinkageError, LinkageErrorKind, TranslateError},
    id::{ClassId, FieldId, MethodId},
    names::{self, NameKind},
    reader::ClassFileReader,
    symbols::{ClassState, MethodSignature, SymbolTable},
};

pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// The state of a class entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
    /// The internal name, as it is in the class file
    Symbolic(String),
    /// Has an id in the symbol table, but has not been loaded or access checked
    Named(ClassId),
    /// Loaded and accessible from the defining class
    Resolved(ClassId),
}

/// A field or method reference.
/// The name-and-type index is kept after resolution since the stack effect of an instruction is
/// computed from the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRef<T> {
    Unresolved {
        class_index: u16,
        name_and_type_index: u16,
    },
    Resolved {
        id: T,
        name_and_type_index: u16,
    },
}
impl<T> MemberRef<T> {
    #[must_use]
    pub fn name_and_type_index(&self) -> u16 {
        match self {
            MemberRef::Unresolved {
                name_and_type_index,
                ..
            }
            | MemberRef::Resolved {
                name_and_type_index,
                ..
            } => *name_and_type_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantEntry {
    /// Index zero and the second slot of a long or double
    Empty,
    /// An entry that is read but never used by the translator
    Skipped { tag: u8 },
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(ClassRef),
    FieldRef(MemberRef<FieldId>),
    MethodRef(MemberRef<MethodId>),
    InterfaceMethodRef(MemberRef<MethodId>),
    NameAndType { name: String, descriptor: String },
}
impl ConstantEntry {
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            ConstantEntry::Empty => 0,
            ConstantEntry::Skipped { tag } => *tag,
            ConstantEntry::Utf8(_) => tag::UTF8,
            ConstantEntry::Integer(_) => tag::INTEGER,
            ConstantEntry::Float(_) => tag::FLOAT,
            ConstantEntry::Long(_) => tag::LONG,
            ConstantEntry::Double(_) => tag::DOUBLE,
            ConstantEntry::String(_) => tag::STRING,
            ConstantEntry::Class(_) => tag::CLASS,
            ConstantEntry::FieldRef(_) => tag::FIELD_REF,
            ConstantEntry::MethodRef(_) => tag::METHOD_REF,
            ConstantEntry::InterfaceMethodRef(_) => tag::INTERFACE_METHOD_REF,
            ConstantEntry::NameAndType { .. } => tag::NAME_AND_TYPE,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        tag_name(self.tag())
    }
}

#[must_use]
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        0 => "unusable",
        tag::UTF8 => "Utf8",
        tag::INTEGER => "Integer",
        tag::FLOAT => "Float",
        tag::LONG => "Long",
        tag::DOUBLE => "Double",
        tag::CLASS => "Class",
        tag::STRING => "String",
        tag::FIELD_REF => "Fieldref",
        tag::METHOD_REF => "Methodref",
        tag::INTERFACE_METHOD_REF => "InterfaceMethodref",
        tag::NAME_AND_TYPE => "NameAndType",
        tag::METHOD_HANDLE => "MethodHandle",
        tag::METHOD_TYPE => "MethodType",
        tag::DYNAMIC => "Dynamic",
        tag::INVOKE_DYNAMIC => "InvokeDynamic",
        tag::MODULE => "Module",
        tag::PACKAGE => "Package",
        _ => "unknown",
    }
}

/// A loadable constant, as pushed by `ldc`
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(ClassId),
}

/// The first pass form of an entry
enum RawEntry {
    Empty,
    Skipped(u8),
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    Member {
        tag: u8,
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
}

#[derive(Debug, Clone)]
struct CachedSignature {
    signature: MethodSignature,
    returns_void: bool,
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<ConstantEntry>,
    /// The class whose class file this pool came from, accessibility is checked against it
    defining_class: Option<ClassId>,
    /// Parsed method descriptors, keyed by the descriptor text
    signatures: HashMap<String, CachedSignature>,
}
impl ConstantPool {
    /// Parse the constant pool, starting at the `constant_pool_count`
    pub fn parse(reader: &mut ClassFileReader<'_>) -> Result<ConstantPool, ClassFormatError> {
        let count = reader.read_u16("constant_pool_count")?;
        let raw = Self::parse_raw(reader, count)?;
        let entries = Self::fixup(&raw)?;

        Ok(ConstantPool {
            entries,
            defining_class: None,
            signatures: HashMap::new(),
        })
    }

    fn parse_raw(
        reader: &mut ClassFileReader<'_>,
        count: u16,
    ) -> Result<Vec<RawEntry>, ClassFormatError> {
        let mut raw = Vec::with_capacity(usize::from(count));
        raw.push(RawEntry::Empty);

        let mut index = 1;
        while index < count {
            let tag = reader.read_u8("constant pool tag")?;
            let entry = match tag {
                tag::UTF8 => RawEntry::Utf8(reader.read_utf8("CONSTANT_Utf8")?),
                tag::INTEGER => RawEntry::Integer(reader.read_i32("CONSTANT_Integer")?),
                tag::FLOAT => RawEntry::Float(reader.read_f32("CONSTANT_Float")?),
                tag::LONG => RawEntry::Long(reader.read_i64("CONSTANT_Long")?),
                tag::DOUBLE => RawEntry::Double(reader.read_f64("CONSTANT_Double")?),
                tag::CLASS => RawEntry::Class(reader.read_u16("CONSTANT_Class")?),
                tag::STRING => RawEntry::String(reader.read_u16("CONSTANT_String")?),
                tag::FIELD_REF | tag::METHOD_REF | tag::INTERFACE_METHOD_REF => RawEntry::Member {
                    tag,
                    class_index: reader.read_u16("class_index")?,
                    name_and_type_index: reader.read_u16("name_and_type_index")?,
                },
                tag::NAME_AND_TYPE => RawEntry::NameAndType {
                    name_index: reader.read_u16("name_index")?,
                    descriptor_index: reader.read_u16("descriptor_index")?,
                },
                tag::METHOD_HANDLE => {
                    reader.skip(3, "CONSTANT_MethodHandle")?;
                    RawEntry::Skipped(tag)
                }
                tag::METHOD_TYPE | tag::MODULE | tag::PACKAGE => {
                    reader.skip(2, "constant")?;
                    RawEntry::Skipped(tag)
                }
                tag::DYNAMIC | tag::INVOKE_DYNAMIC => {
                    reader.skip(4, "CONSTANT_InvokeDynamic")?;
                    RawEntry::Skipped(tag)
                }
                _ => return Err(ClassFormatError::BadConstantTag { index, tag }),
            };

            let is_wide = matches!(entry, RawEntry::Long(_) | RawEntry::Double(_));
            raw.push(entry);
            if is_wide {
                // The second slot has to exist, even though it can't be used
                if index + 1 >= count {
                    return Err(ClassFormatError::MissingPhantomSlot { index });
                }
                raw.push(RawEntry::Empty);
                index += 2;
            } else {
                index += 1;
            }
        }

        Ok(raw)
    }

    fn fixup(raw: &[RawEntry]) -> Result<Vec<ConstantEntry>, ClassFormatError> {
        let utf8 = |index: u16| -> Result<&str, ClassFormatError> {
            match raw.get(usize::from(index)) {
                Some(RawEntry::Utf8(text)) => Ok(text.as_str()),
                Some(RawEntry::Empty) | None => Err(ClassFormatError::BadConstantIndex { index }),
                Some(other) => Err(ClassFormatError::UnexpectedConstantTag {
                    index,
                    expected: "Utf8",
                    found: raw_kind_name(other),
                }),
            }
        };

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let entry = match entry {
                RawEntry::Empty => ConstantEntry::Empty,
                RawEntry::Skipped(tag) => ConstantEntry::Skipped { tag: *tag },
                RawEntry::Utf8(text) => ConstantEntry::Utf8(text.clone()),
                RawEntry::Integer(v) => ConstantEntry::Integer(*v),
                RawEntry::Float(v) => ConstantEntry::Float(*v),
                RawEntry::Long(v) => ConstantEntry::Long(*v),
                RawEntry::Double(v) => ConstantEntry::Double(*v),
                RawEntry::String(index) => ConstantEntry::String(utf8(*index)?.to_owned()),
                RawEntry::Class(index) => {
                    let name = utf8(*index)?;
                    if !names::is_legal_name(name, NameKind::Class) {
                        return Err(ClassFormatError::IllegalName {
                            name: name.to_owned(),
                            kind: NameKind::Class.as_str(),
                        });
                    }
                    ConstantEntry::Class(ClassRef::Symbolic(name.to_owned()))
                }
                RawEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => ConstantEntry::NameAndType {
                    name: utf8(*name_index)?.to_owned(),
                    descriptor: utf8(*descriptor_index)?.to_owned(),
                },
                RawEntry::Member {
                    tag,
                    class_index,
                    name_and_type_index,
                } => {
                    match raw.get(usize::from(*class_index)) {
                        Some(RawEntry::Class(_)) => {}
                        Some(RawEntry::Empty) | None => {
                            return Err(ClassFormatError::BadConstantIndex {
                                index: *class_index,
                            })
                        }
                        Some(other) => {
                            return Err(ClassFormatError::UnexpectedConstantTag {
                                index: *class_index,
                                expected: "Class",
                                found: raw_kind_name(other),
                            })
                        }
                    }

                    let (name, descriptor) = match raw.get(usize::from(*name_and_type_index)) {
                        Some(RawEntry::NameAndType {
                            name_index,
                            descriptor_index,
                        }) => (utf8(*name_index)?, utf8(*descriptor_index)?),
                        Some(RawEntry::Empty) | None => {
                            return Err(ClassFormatError::BadConstantIndex {
                                index: *name_and_type_index,
                            })
                        }
                        Some(other) => {
                            return Err(ClassFormatError::UnexpectedConstantTag {
                                index: *name_and_type_index,
                                expected: "NameAndType",
                                found: raw_kind_name(other),
                            })
                        }
                    };

                    if *tag == tag::FIELD_REF {
                        verify_field_name_and_type(name, descriptor)?;
                        ConstantEntry::FieldRef(MemberRef::Unresolved {
                            class_index: *class_index,
                            name_and_type_index: *name_and_type_index,
                        })
                    } else {
                        verify_method_name_and_type(name, descriptor)?;
                        let member = MemberRef::Unresolved {
                            class_index: *class_index,
                            name_and_type_index: *name_and_type_index,
                        };
                        if *tag == tag::METHOD_REF {
                            ConstantEntry::MethodRef(member)
                        } else {
                            ConstantEntry::InterfaceMethodRef(member)
                        }
                    }
                }
            };
            entries.push(entry);
        }

        Ok(entries)
    }

    /// The number of slots in the pool, including the unusable slot zero
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    #[must_use]
    pub fn defining_class(&self) -> Option<ClassId> {
        self.defining_class
    }

    pub fn set_defining_class(&mut self, id: ClassId) {
        self.defining_class = Some(id);
    }

    fn requesting_class(&self) -> Result<ClassId, ClassFormatError> {
        self.defining_class
            .ok_or(ClassFormatError::Malformed {
                field: "this_class",
                offset: 0,
                message: "constant pool has no defining class".into(),
            })
    }

    pub fn entry(&self, index: u16) -> Result<&ConstantEntry, ClassFormatError> {
        match self.entries.get(usize::from(index)) {
            Some(ConstantEntry::Empty) | None => Err(ClassFormatError::BadConstantIndex { index }),
            Some(entry) => Ok(entry),
        }
    }

    fn entry_mut(&mut self, index: u16) -> Result<&mut ConstantEntry, ClassFormatError> {
        match self.entries.get_mut(usize::from(index)) {
            Some(ConstantEntry::Empty) | None => Err(ClassFormatError::BadConstantIndex { index }),
            Some(entry) => Ok(entry),
        }
    }

    pub fn tag(&self, index: u16) -> Result<u8, ClassFormatError> {
        self.entry(index).map(ConstantEntry::tag)
    }

    fn unexpected(&self, index: u16, expected: &'static str) -> ClassFormatError {
        ClassFormatError::UnexpectedConstantTag {
            index,
            expected,
            found: self
                .entries
                .get(usize::from(index))
                .map_or("unusable", ConstantEntry::kind_name),
        }
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::Utf8(text) => Ok(text),
            _ => Err(self.unexpected(index, "Utf8")),
        }
    }

    pub fn get_integer(&self, index: u16) -> Result<i32, ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::Integer(v) => Ok(*v),
            _ => Err(self.unexpected(index, "Integer")),
        }
    }

    pub fn get_float(&self, index: u16) -> Result<f32, ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::Float(v) => Ok(*v),
            _ => Err(self.unexpected(index, "Float")),
        }
    }

    pub fn get_long(&self, index: u16) -> Result<i64, ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::Long(v) => Ok(*v),
            _ => Err(self.unexpected(index, "Long")),
        }
    }

    pub fn get_double(&self, index: u16) -> Result<f64, ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::Double(v) => Ok(*v),
            _ => Err(self.unexpected(index, "Double")),
        }
    }

    pub fn get_string(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::String(text) => Ok(text),
            _ => Err(self.unexpected(index, "String")),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.entry(index)? {
            ConstantEntry::NameAndType { name, descriptor } => Ok((name, descriptor)),
            _ => Err(self.unexpected(index, "NameAndType")),
        }
    }

    /// The name and descriptor of a field, method or interface method reference.
    /// This works whether or not the reference has been resolved.
    pub fn member_name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        let nat_index = match self.entry(index)? {
            ConstantEntry::FieldRef(member) => member.name_and_type_index(),
            ConstantEntry::MethodRef(member) | ConstantEntry::InterfaceMethodRef(member) => {
                member.name_and_type_index()
            }
            _ => return Err(self.unexpected(index, "Fieldref or Methodref")),
        };
        self.name_and_type(nat_index)
    }

    /// Get the class that a class entry refers to, without loading it
    pub fn get_klass<S: SymbolTable + ?Sized>(
        &mut self,
        index: u16,
        table: &mut S,
    ) -> Result<ClassId, ClassFormatError> {
        let class_ref = match self.entry(index)? {
            ConstantEntry::Class(class_ref) => class_ref,
            _ => return Err(self.unexpected(index, "Class")),
        };

        match class_ref {
            ClassRef::Named(id) | ClassRef::Resolved(id) => Ok(*id),
            ClassRef::Symbolic(name) => {
                let id = table.class_id(&names::class_name_from_internal(name));
                *self.entry_mut(index)? = ConstantEntry::Class(ClassRef::Named(id));
                Ok(id)
            }
        }
    }

    /// Get the class that a class entry refers to, loading it and checking that the defining
    /// class can access it
    pub fn get_resolved_class<S: SymbolTable + ?Sized>(
        &mut self,
        index: u16,
        table: &mut S,
    ) -> Result<ClassId, TranslateError> {
        if let ConstantEntry::Class(ClassRef::Resolved(id)) = self.entry(index)? {
            tracing::trace!("Constant pool class {} already resolved", index);
            return Ok(*id);
        }

        let requesting = self.requesting_class()?;
        let id = self.get_klass(index, table)?;
        load_checked(table, id)?;

        if !table.is_accessible_from(id, requesting) {
            return Err(LinkageError::new(
                LinkageErrorKind::IllegalAccess,
                format!(
                    "tried to access class {} from class {}",
                    table.display_name(id),
                    table.display_name(requesting)
                ),
            )
            .into());
        }

        *self.entry_mut(index)? = ConstantEntry::Class(ClassRef::Resolved(id));
        Ok(id)
    }

    /// Resolve a field reference.
    /// A field that exists with the other static-ness is an `IncompatibleClassChangeError`.
    pub fn get_resolved_field<S: SymbolTable + ?Sized>(
        &mut self,
        index: u16,
        is_static: bool,
        table: &mut S,
    ) -> Result<FieldId, TranslateError> {
        let (class_index, name_and_type_index) = match self.entry(index)? {
            ConstantEntry::FieldRef(MemberRef::Resolved { id, .. }) => {
                let id = *id;
                let field = table
                    .field(id)
                    .ok_or(ClassFormatError::BadConstantIndex { index })?;
                if field.is_static() != is_static {
                    return Err(static_mismatch(
                        table,
                        "field",
                        field.declaring_class,
                        &field.name,
                        is_static,
                    )
                    .into());
                }
                return Ok(id);
            }
            ConstantEntry::FieldRef(MemberRef::Unresolved {
                class_index,
                name_and_type_index,
            }) => (*class_index, *name_and_type_index),
            _ => return Err(self.unexpected(index, "Fieldref").into()),
        };

        let requesting = self.requesting_class()?;
        let class_id = self.get_resolved_class(class_index, table)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        let (name, descriptor) = (name.to_owned(), descriptor.to_owned());

        let field_type = table.class_id(&names::class_name_from_descriptor(&descriptor));
        let field_id = match table.lookup_field(class_id, &name, field_type, is_static) {
            Some(field_id) => field_id,
            None => {
                return Err(
                    if table
                        .lookup_field(class_id, &name, field_type, !is_static)
                        .is_some()
                    {
                        static_mismatch(table, "field", class_id, &name, is_static)
                    } else {
                        LinkageError::new(
                            LinkageErrorKind::NoSuchField,
                            format!("{}.{}", table.display_name(class_id), name),
                        )
                    }
                    .into(),
                )
            }
        };

        load_checked(table, field_type)?;

        if !table.is_field_accessible_from(field_id, requesting) {
            return Err(LinkageError::new(
                LinkageErrorKind::IllegalAccess,
                format!(
                    "tried to access field {}.{} from class {}",
                    table.display_name(class_id),
                    name,
                    table.display_name(requesting)
                ),
            )
            .into());
        }

        *self.entry_mut(index)? = ConstantEntry::FieldRef(MemberRef::Resolved {
            id: field_id,
            name_and_type_index,
        });
        Ok(field_id)
    }

    /// Resolve a method or interface method reference.
    ///
    /// Constructors of classes are looked up as static methods returning the class.
    /// `invokeinterface` must name a method of an interface, and every other invoke must name a
    /// method of a class. The one exception is a non-interface call through an abstract class
    /// that only gets the method from one of its interfaces, which is allowed since it is
    /// turned into an interface call later.
    pub fn get_resolved_method<S: SymbolTable + ?Sized>(
        &mut self,
        index: u16,
        is_static: bool,
        invokeinterface: bool,
        table: &mut S,
    ) -> Result<MethodId, TranslateError> {
        let (class_index, name_and_type_index) = match self.entry(index)? {
            ConstantEntry::MethodRef(member) | ConstantEntry::InterfaceMethodRef(member) => {
                match *member {
                    MemberRef::Resolved { id, .. } => {
                        let method = table
                            .method(id)
                            .ok_or(ClassFormatError::BadConstantIndex { index })?;
                        let expected_static = is_static || method.is_constructor();
                        if method.is_static() != expected_static {
                            return Err(static_mismatch(
                                table,
                                "method",
                                method.declaring_class,
                                &method.name,
                                expected_static,
                            )
                            .into());
                        }
                        tracing::trace!("Constant pool method {} already resolved", index);
                        return Ok(id);
                    }
                    MemberRef::Unresolved {
                        class_index,
                        name_and_type_index,
                    } => (class_index, name_and_type_index),
                }
            }
            _ => return Err(self.unexpected(index, "Methodref").into()),
        };

        let requesting = self.requesting_class()?;
        let class_id = self.get_resolved_class(class_index, table)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        let (name, descriptor) = (name.to_owned(), descriptor.to_owned());

        let is_constructor = name == "<init>";
        let class_is_interface = table.is_interface(class_id);
        let mut is_static = is_static;
        let mut signature =
            self.verify_method_type(&descriptor, is_constructor, is_static, table)?;
        if is_constructor && !class_is_interface {
            signature.return_type = class_id;
            is_static = true;
        }

        let method_id = match table.lookup_method(
            class_id,
            &name,
            &signature.parameters,
            signature.return_type,
            requesting,
            is_static,
        ) {
            Some(method_id) => method_id,
            None => {
                let other = table.lookup_method(
                    class_id,
                    &name,
                    &signature.parameters,
                    signature.return_type,
                    requesting,
                    !is_static,
                );
                return Err(if other.is_some() {
                    static_mismatch(table, "method", class_id, &name, is_static)
                } else {
                    LinkageError::new(
                        LinkageErrorKind::NoSuchMethod,
                        format!("{}.{}{}", table.display_name(class_id), name, descriptor),
                    )
                }
                .into());
            }
        };

        let declaring_class = table
            .method(method_id)
            .map_or(class_id, |method| method.declaring_class);
        let interface_mismatch = if invokeinterface {
            !class_is_interface
        } else {
            class_is_interface
                || (table.is_interface(declaring_class) && !table.is_abstract(class_id))
        };
        if interface_mismatch {
            return Err(LinkageError::new(
                LinkageErrorKind::IncompatibleClassChange,
                format!(
                    "{} method {}.{}{} {}",
                    if invokeinterface { "interface" } else { "virtual" },
                    table.display_name(class_id),
                    name,
                    descriptor,
                    if invokeinterface {
                        "called on a class"
                    } else {
                        "called on an interface"
                    }
                ),
            )
            .into());
        }

        load_checked(table, signature.return_type)?;
        for parameter in &signature.parameters {
            load_checked(table, *parameter)?;
        }

        if !table.is_method_accessible_from(method_id, requesting) {
            return Err(LinkageError::new(
                LinkageErrorKind::IllegalAccess,
                format!(
                    "tried to access method {}.{}{} from class {}",
                    table.display_name(class_id),
                    name,
                    descriptor,
                    table.display_name(requesting)
                ),
            )
            .into());
        }

        let resolved = MemberRef::Resolved {
            id: method_id,
            name_and_type_index,
        };
        let entry = self.entry_mut(index)?;
        *entry = match entry {
            ConstantEntry::InterfaceMethodRef(_) => ConstantEntry::InterfaceMethodRef(resolved),
            _ => ConstantEntry::MethodRef(resolved),
        };
        Ok(method_id)
    }

    /// Parse and check a method descriptor.
    /// The parsed signature is cached by the descriptor text, the checks that depend on how
    /// the method is used are redone on every call.
    pub fn verify_method_type<S: SymbolTable + ?Sized>(
        &mut self,
        descriptor: &str,
        is_special_method: bool,
        is_static: bool,
        table: &mut S,
    ) -> Result<MethodSignature, ClassFormatError> {
        if let Some(cached) = self.signatures.get(descriptor) {
            if is_special_method && !cached.returns_void {
                return Err(ClassFormatError::IllegalDescriptor {
                    descriptor: descriptor.to_owned(),
                });
            }
            let slots = cached.signature.parameter_slots + usize::from(!is_static);
            if slots > names::MAX_PARAMETER_SLOTS {
                return Err(ClassFormatError::TooManyParameters {
                    descriptor: descriptor.to_owned(),
                    slots,
                });
            }
            return Ok(cached.signature.clone());
        }

        let parts = names::verify_method_type(descriptor, is_special_method, is_static)?;
        let parameters = parts
            .parameters
            .iter()
            .map(|param| table.class_id(&names::class_name_from_descriptor(param)))
            .collect::<SmallVec<[ClassId; 8]>>();
        let return_type = table.class_id(&names::class_name_from_descriptor(parts.return_type));
        let signature = MethodSignature {
            parameters,
            return_type,
            parameter_slots: parts.parameter_slots,
        };

        self.signatures.insert(
            descriptor.to_owned(),
            CachedSignature {
                signature: signature.clone(),
                returns_void: parts.return_type == "V",
            },
        );
        Ok(signature)
    }
}

fn raw_kind_name(entry: &RawEntry) -> &'static str {
    match entry {
        RawEntry::Empty => "unusable",
        RawEntry::Skipped(tag) => tag_name(*tag),
        RawEntry::Utf8(_) => "Utf8",
        RawEntry::Integer(_) => "Integer",
        RawEntry::Float(_) => "Float",
        RawEntry::Long(_) => "Long",
        RawEntry::Double(_) => "Double",
        RawEntry::Class(_) => "Class",
        RawEntry::String(_) => "String",
        RawEntry::Member { tag, .. } => tag_name(*tag),
        RawEntry::NameAndType { .. } => "NameAndType",
    }
}

fn verify_field_name_and_type(name: &str, descriptor: &str) -> Result<(), ClassFormatError> {
    if !names::is_legal_name(name, NameKind::Field) {
        return Err(ClassFormatError::IllegalName {
            name: name.to_owned(),
            kind: NameKind::Field.as_str(),
        });
    }
    if !names::is_field_type(descriptor) {
        return Err(ClassFormatError::IllegalDescriptor {
            descriptor: descriptor.to_owned(),
        });
    }
    Ok(())
}

fn verify_method_name_and_type(name: &str, descriptor: &str) -> Result<(), ClassFormatError> {
    // Only constructors can be referenced among the special methods
    if name.starts_with('<') && name != "<init>" {
        return Err(ClassFormatError::IllegalMethodName {
            name: name.to_owned(),
        });
    }
    if !names::is_legal_name(name, NameKind::Method) {
        return Err(ClassFormatError::IllegalName {
            name: name.to_owned(),
            kind: NameKind::Method.as_str(),
        });
    }
    let parts = names::parse_method_descriptor(descriptor)?;
    if name == "<init>" && parts.return_type != "V" {
        return Err(ClassFormatError::IllegalDescriptor {
            descriptor: descriptor.to_owned(),
        });
    }
    Ok(())
}

/// Load a class and fail if it ended up in the error state
pub(crate) fn load_checked<S: SymbolTable + ?Sized>(
    table: &mut S,
    id: ClassId,
) -> Result<(), LinkageError> {
    match table.load_class(id) {
        ClassState::Loaded => Ok(()),
        ClassState::Error | ClassState::Unloaded => Err(LinkageError::new(
            LinkageErrorKind::NoClassDefFound,
            table.display_name(id),
        )),
    }
}

fn static_mismatch<S: SymbolTable + ?Sized>(
    table: &S,
    what: &str,
    class_id: ClassId,
    name: &str,
    expected_static: bool,
) -> LinkageError {
    LinkageError::new(
        LinkageErrorKind::IncompatibleClassChange,
        format!(
            "expected {} {} {}.{}",
            if expected_static { "static" } else { "non-static" },
            what,
            table.display_name(class_id),
            name
        ),
    )
}
