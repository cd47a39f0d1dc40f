//! The interface to the loaded-class universe that resolution runs against.
//!
//! Class names are in the form used by `Class.getName()`: ordinary classes are dotted
//! (`java.lang.Object`), arrays keep their descriptor text (`[I`, `[Ljava/lang/String;`) and
//! primitives use their keyword (`int`, `void`).

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::id::{ClassId, FieldId, MethodId};

bitflags! {
    pub struct ClassAccess: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Access flags shared by fields and methods.
    /// Bits that mean different things for each (`volatile`/`bridge`) are kept under the field
    /// name.
    pub struct MemberAccess: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// The name is known but the class has not been loaded
    Unloaded,
    Loaded,
    /// Loading the class failed, any use of it is a `NoClassDefFoundError`
    Error,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub declaring_class: ClassId,
    pub name: String,
    pub field_type: ClassId,
    pub access: MemberAccess,
}
impl FieldInfo {
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MemberAccess::STATIC)
    }
}

/// A method's parameter and return types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub parameters: SmallVec<[ClassId; 8]>,
    pub return_type: ClassId,
    /// The local slots taken up by the parameters, not including `this`
    pub parameter_slots: usize,
}

/// A method as the symbol table knows it.
/// Constructors are kept as static methods that return their declaring class.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub declaring_class: ClassId,
    pub name: String,
    pub signature: MethodSignature,
    pub access: MemberAccess,
}
impl MethodInfo {
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MemberAccess::STATIC)
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// The class/method/field symbol table that the constant pool resolves against.
pub trait SymbolTable {
    /// Get the id for a class name without loading it
    fn class_id(&mut self, name: &str) -> ClassId;

    /// Get the name of a class, `None` if the id is not from this table
    fn class_name(&self, id: ClassId) -> Option<&str>;

    /// Load the class if it is not already, along with its supertypes.
    /// Failure is reported through the returned state rather than an error, since it is the
    /// resolver that decides which linkage error that becomes.
    fn load_class(&mut self, id: ClassId) -> ClassState;

    fn class_state(&self, id: ClassId) -> ClassState;

    /// The access flags of a loaded class
    fn class_access(&self, id: ClassId) -> Option<ClassAccess>;

    /// The direct superclass of a loaded class
    fn super_class(&self, id: ClassId) -> Option<ClassId>;

    /// The component type of a loaded array class
    fn component_type(&self, id: ClassId) -> Option<ClassId>;

    /// Whether a value of type `source` can be stored in a location of type `target`
    fn is_assignable_from(&self, target: ClassId, source: ClassId) -> bool;

    /// Whether `class` is accessible from code in `from`
    fn is_accessible_from(&self, class: ClassId, from: ClassId) -> bool;

    fn lookup_field(
        &self,
        class: ClassId,
        name: &str,
        field_type: ClassId,
        is_static: bool,
    ) -> Option<FieldId>;

    fn lookup_method(
        &self,
        class: ClassId,
        name: &str,
        parameters: &[ClassId],
        return_type: ClassId,
        requesting_class: ClassId,
        is_static: bool,
    ) -> Option<MethodId>;

    fn field(&self, id: FieldId) -> Option<&FieldInfo>;

    fn method(&self, id: MethodId) -> Option<&MethodInfo>;

    fn is_field_accessible_from(&self, field: FieldId, from: ClassId) -> bool;

    fn is_method_accessible_from(&self, method: MethodId, from: ClassId) -> bool;

    fn is_interface(&self, id: ClassId) -> bool {
        self.class_access(id)
            .map_or(false, |access| access.contains(ClassAccess::INTERFACE))
    }

    fn is_abstract(&self, id: ClassId) -> bool {
        self.class_access(id)
            .map_or(false, |access| access.contains(ClassAccess::ABSTRACT))
    }

    /// The name of a class for use in error messages
    fn display_name(&self, id: ClassId) -> String {
        self.class_name(id)
            .map_or_else(|| format!("{:?}", id), ToString::to_string)
    }
}
