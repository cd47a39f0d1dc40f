//! Grammar checks for names and descriptors in a class file.
//! Everything in here is pure, the constant pool and the code parser call into these and then
//! decide what to do with the pieces.

use std::borrow::Cow;

use smallvec::SmallVec;

use crate::error::ClassFormatError;

/// The maximum number of array dimensions a descriptor may have
pub const MAX_ARRAY_DIMENSIONS: usize = 255;
/// The maximum number of local slots the parameters of a method may take up
pub const MAX_PARAMETER_SLOTS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Class,
    Field,
    Method,
}
impl NameKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NameKind::Class => "class",
            NameKind::Field => "field",
            NameKind::Method => "method",
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Check an unqualified name. The first character can't be a digit.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_identifier_start(first) => chars.all(is_identifier_part),
        _ => false,
    }
}

#[must_use]
pub fn is_legal_name(name: &str, kind: NameKind) -> bool {
    match kind {
        NameKind::Method => name == "<init>" || name == "<clinit>" || is_identifier(name),
        NameKind::Field => is_identifier(name),
        NameKind::Class => {
            if name.starts_with('[') {
                skip_over_field_type(name.as_bytes(), 0, false) == Some(name.len())
            } else {
                !name.is_empty() && name.split('/').all(is_identifier)
            }
        }
    }
}

/// Skip over a single field type starting at `start`.
/// Returns the offset just past the type, or `None` if there is no valid type there.
/// `void_ok` allows `V`, which is only valid as a return type.
#[must_use]
pub fn skip_over_field_type(desc: &[u8], start: usize, void_ok: bool) -> Option<usize> {
    let mut idx = start;
    let mut dimensions = 0;
    while desc.get(idx) == Some(&b'[') {
        dimensions += 1;
        idx += 1;
    }

    if dimensions > MAX_ARRAY_DIMENSIONS {
        return None;
    }

    match *desc.get(idx)? {
        b'V' => (void_ok && dimensions == 0).then(|| idx + 1),
        b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => Some(idx + 1),
        b'L' => {
            let name_start = idx + 1;
            let name_len = desc[name_start..].iter().position(|x| *x == b';')?;
            let name = std::str::from_utf8(&desc[name_start..name_start + name_len]).ok()?;
            if !name.starts_with('[') && is_legal_name(name, NameKind::Class) {
                Some(name_start + name_len + 1)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Check that the whole of `desc` is a single field type
#[must_use]
pub fn is_field_type(desc: &str) -> bool {
    skip_over_field_type(desc.as_bytes(), 0, false) == Some(desc.len())
}

/// The number of local variable slots a field type takes up as a parameter
#[must_use]
pub fn field_type_slots(desc: &str) -> usize {
    match desc.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        Some(b'V') => 0,
        _ => 1,
    }
}

/// A method descriptor broken up into its textual pieces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptorParts<'a> {
    pub parameters: SmallVec<[&'a str; 8]>,
    pub return_type: &'a str,
    /// The slots taken up by the parameters, not including any `this`
    pub parameter_slots: usize,
}

/// Split a method descriptor into its parameters and return type, checking the grammar.
pub fn parse_method_descriptor(
    descriptor: &str,
) -> Result<MethodDescriptorParts<'_>, ClassFormatError> {
    let illegal = || ClassFormatError::IllegalDescriptor {
        descriptor: descriptor.to_owned(),
    };
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(illegal());
    }

    let mut parameters = SmallVec::new();
    let mut parameter_slots = 0;
    let mut idx = 1;
    loop {
        match bytes.get(idx) {
            Some(b')') => break,
            Some(_) => {
                let end = skip_over_field_type(bytes, idx, false).ok_or_else(illegal)?;
                let param = &descriptor[idx..end];
                parameter_slots += field_type_slots(param);
                parameters.push(param);
                idx = end;
            }
            None => return Err(illegal()),
        }
    }

    // Skip the ')'
    idx += 1;
    let end = skip_over_field_type(bytes, idx, true).ok_or_else(illegal)?;
    if end != bytes.len() {
        return Err(illegal());
    }

    Ok(MethodDescriptorParts {
        parameters,
        return_type: &descriptor[idx..],
        parameter_slots,
    })
}

/// Verify a method descriptor for a method that will be invoked or defined.
/// Special methods (`<init>` and `<clinit>`) must return void.
/// The parameters, plus `this` for instance methods, can't take up more than 255 slots.
pub fn verify_method_type(
    descriptor: &str,
    is_special_method: bool,
    is_static: bool,
) -> Result<MethodDescriptorParts<'_>, ClassFormatError> {
    let parts = parse_method_descriptor(descriptor)?;
    if is_special_method && parts.return_type != "V" {
        return Err(ClassFormatError::IllegalDescriptor {
            descriptor: descriptor.to_owned(),
        });
    }

    let slots = parts.parameter_slots + usize::from(!is_static);
    if slots > MAX_PARAMETER_SLOTS {
        return Err(ClassFormatError::TooManyParameters {
            descriptor: descriptor.to_owned(),
            slots,
        });
    }

    Ok(parts)
}

/// The name of a primitive type given its descriptor character
#[must_use]
pub fn primitive_name(desc: u8) -> Option<&'static str> {
    Some(match desc {
        b'Z' => "boolean",
        b'B' => "byte",
        b'C' => "char",
        b'S' => "short",
        b'I' => "int",
        b'J' => "long",
        b'F' => "float",
        b'D' => "double",
        b'V' => "void",
        _ => return None,
    })
}

/// The descriptor character of a primitive type given its name
#[must_use]
pub fn primitive_descriptor(name: &str) -> Option<u8> {
    Some(match name {
        "boolean" => b'Z',
        "byte" => b'B',
        "char" => b'C',
        "short" => b'S',
        "int" => b'I',
        "long" => b'J',
        "float" => b'F',
        "double" => b'D',
        "void" => b'V',
        _ => return None,
    })
}

/// Convert a class name as it appears in a class constant into the name used for the class in
/// the symbol table.
/// `java/lang/Object` becomes `java.lang.Object`, array names are left as they are.
#[must_use]
pub fn class_name_from_internal(name: &str) -> Cow<'_, str> {
    if name.starts_with('[') || !name.contains('/') {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(name.replace('/', "."))
    }
}

/// Convert a (valid) field type descriptor into the name used for the type in the symbol table
#[must_use]
pub fn class_name_from_descriptor(desc: &str) -> Cow<'_, str> {
    let bytes = desc.as_bytes();
    match bytes.first() {
        Some(b'L') if desc.ends_with(';') => class_name_from_internal(&desc[1..desc.len() - 1]),
        Some(b'[') => Cow::Borrowed(desc),
        Some(c) if bytes.len() == 1 => {
            primitive_name(*c).map_or(Cow::Borrowed(desc), Cow::Borrowed)
        }
        _ => Cow::Borrowed(desc),
    }
}

/// Convert a symbol table class name back into a field type descriptor
#[must_use]
pub fn descriptor_from_class_name(name: &str) -> Cow<'_, str> {
    if name.starts_with('[') {
        Cow::Borrowed(name)
    } else if let Some(prim) = primitive_descriptor(name) {
        Cow::Owned(char::from(prim).to_string())
    } else {
        Cow::Owned(format!("L{};", name.replace('.', "/")))
    }
}

/// The name of the component type of an array class name, `None` if it is not an array
#[must_use]
pub fn array_component_name(name: &str) -> Option<Cow<'_, str>> {
    name.strip_prefix('[').map(class_name_from_descriptor)
}

/// The package part of a symbol table class name, empty for the default package
#[must_use]
pub fn package_of(name: &str) -> &str {
    name.rfind('.').map_or("", |idx| &name[..idx])
}
