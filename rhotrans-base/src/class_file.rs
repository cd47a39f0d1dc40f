//! The declarations of a class file: its constant pool, supertypes, fields and methods.
//! Method bodies are kept as the raw bytes of their `Code` attribute, which is parsed per method
//! by [`crate::code::CodeParser`].

use crate::{
    constant_pool::{ClassRef, ConstantEntry, ConstantPool},
    error::ClassFormatError,
    id::ClassId,
    names::{self, NameKind},
    reader::ClassFileReader,
    symbols::{ClassAccess, MemberAccess, SymbolTable},
};

pub const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub descriptor: String,
    pub access: MemberAccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    pub descriptor: String,
    pub access: MemberAccess,
    /// The body of the `Code` attribute, if the method has one
    pub code: Option<Vec<u8>>,
}
impl MethodDecl {
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MemberAccess::STATIC)
    }
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub id: ClassId,
    /// The name as written in the class file (`java/lang/Object`)
    pub internal_name: String,
    pub minor_version: u16,
    pub major_version: u16,
    pub access: ClassAccess,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub constant_pool: ConstantPool,
}
impl ClassFile {
    pub fn parse<S: SymbolTable + ?Sized>(
        data: &[u8],
        table: &mut S,
    ) -> Result<ClassFile, ClassFormatError> {
        let mut reader = ClassFileReader::new(data);
        let magic = reader.read_u32("magic")?;
        if magic != MAGIC {
            return Err(ClassFormatError::Malformed {
                field: "magic",
                offset: 0,
                message: format!("{:#010x}", magic).into(),
            });
        }
        let minor_version = reader.read_u16("minor_version")?;
        let major_version = reader.read_u16("major_version")?;

        let mut constant_pool = ConstantPool::parse(&mut reader)?;

        let access = ClassAccess::from_bits_truncate(reader.read_u16("access_flags")?);
        let this_class = reader.read_u16("this_class")?;
        let internal_name = match constant_pool.entry(this_class)? {
            ConstantEntry::Class(ClassRef::Symbolic(name)) if !name.starts_with('[') => {
                name.clone()
            }
            _ => return Err(reader.format_error("this_class", "not a class constant")),
        };
        let id = constant_pool.get_klass(this_class, table)?;
        constant_pool.set_defining_class(id);

        let super_index = reader.read_u16("super_class")?;
        let super_class = if super_index == 0 {
            None
        } else {
            Some(constant_pool.get_klass(super_index, table)?)
        };

        let interfaces_count = reader.read_u16("interfaces_count")?;
        let mut interfaces = Vec::with_capacity(usize::from(interfaces_count));
        for _ in 0..interfaces_count {
            let index = reader.read_u16("interfaces")?;
            interfaces.push(constant_pool.get_klass(index, table)?);
        }

        let fields_count = reader.read_u16("fields_count")?;
        let mut fields = Vec::with_capacity(usize::from(fields_count));
        for _ in 0..fields_count {
            let access = MemberAccess::from_bits_truncate(reader.read_u16("field access_flags")?);
            let name = constant_pool.get_utf8(reader.read_u16("field name_index")?)?;
            let descriptor = constant_pool.get_utf8(reader.read_u16("field descriptor_index")?)?;
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
            let field = FieldDecl {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
                access,
            };
            skip_attributes(&mut reader)?;
            fields.push(field);
        }

        let methods_count = reader.read_u16("methods_count")?;
        let mut methods = Vec::with_capacity(usize::from(methods_count));
        for _ in 0..methods_count {
            let access =
                MemberAccess::from_bits_truncate(reader.read_u16("method access_flags")?);
            let name = constant_pool
                .get_utf8(reader.read_u16("method name_index")?)?
                .to_owned();
            let descriptor = constant_pool
                .get_utf8(reader.read_u16("method descriptor_index")?)?
                .to_owned();
            if !names::is_legal_name(&name, NameKind::Method) {
                return Err(ClassFormatError::IllegalName {
                    name,
                    kind: NameKind::Method.as_str(),
                });
            }
            constant_pool.verify_method_type(
                &descriptor,
                name.starts_with('<'),
                access.contains(MemberAccess::STATIC),
                table,
            )?;

            let mut code = None;
            let attributes_count = reader.read_u16("method attributes_count")?;
            for _ in 0..attributes_count {
                let name_index = reader.read_u16("attribute_name_index")?;
                let length = reader.read_u32("attribute_length")?;
                let body = reader.read_bytes(length as usize, "attribute")?;
                if constant_pool.get_utf8(name_index)? == "Code" {
                    if code.is_some() {
                        return Err(reader.format_error("Code", "more than one Code attribute"));
                    }
                    code = Some(body.to_vec());
                }
            }

            methods.push(MethodDecl {
                name,
                descriptor,
                access,
                code,
            });
        }

        skip_attributes(&mut reader)?;

        if !reader.is_at_end() {
            tracing::warn!(
                "Class file for {} has {} trailing bytes",
                internal_name,
                reader.remaining()
            );
        }

        Ok(ClassFile {
            id,
            internal_name,
            minor_version,
            major_version,
            access,
            super_class,
            interfaces,
            fields,
            methods,
            constant_pool,
        })
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccess::INTERFACE)
    }
}

fn skip_attributes(reader: &mut ClassFileReader<'_>) -> Result<(), ClassFormatError> {
    let count = reader.read_u16("attributes_count")?;
    for _ in 0..count {
        reader.skip(2, "attribute_name_index")?;
        let length = reader.read_u32("attribute_length")?;
        reader.skip(length as usize, "attribute")?;
    }
    Ok(())
}
