use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::{
    class_file::{ClassFile, FieldDecl, MethodDecl},
    error::ClassFormatError,
    id::{ClassId, FieldId, MethodId},
    names,
    symbols::{
        ClassAccess, ClassState, FieldInfo, MemberAccess, MethodInfo, MethodSignature,
        SymbolTable,
    },
    util::{self, HashWrapper, HashWrapperTrait},
};

use super::{
    class_file_loader::{ClassFileLoader, EmptyLoader, LoadClassFileError},
    class_names::ClassNames,
};

/// A class described in code rather than loaded from a class file
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    name: String,
    access: ClassAccess,
    super_class: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldDecl>,
    methods: Vec<MethodDecl>,
}
impl ClassDefinition {
    /// A public class extending `java.lang.Object`
    #[must_use]
    pub fn new(name: impl Into<String>) -> ClassDefinition {
        let name = name.into();
        let super_class = if name == "java.lang.Object" {
            None
        } else {
            Some("java.lang.Object".to_owned())
        };
        ClassDefinition {
            name,
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn access(mut self, access: ClassAccess) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn super_class(mut self, name: impl Into<String>) -> Self {
        self.super_class = Some(name.into());
        self
    }

    #[must_use]
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(name.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: &str, descriptor: &str, access: MemberAccess) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            access,
        });
        self
    }

    #[must_use]
    pub fn method(mut self, name: &str, descriptor: &str, access: MemberAccess) -> Self {
        self.methods.push(MethodDecl {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            access,
            code: None,
        });
        self
    }
}

#[derive(Debug, Clone)]
struct ClassData {
    access: ClassAccess,
    super_class: Option<ClassId>,
    interfaces: SmallVec<[ClassId; 4]>,
    component: Option<ClassId>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
}
impl ClassData {
    fn empty(access: ClassAccess) -> ClassData {
        ClassData {
            access,
            super_class: None,
            interfaces: SmallVec::new(),
            component: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum ClassEntry {
    Loaded(ClassData),
    /// Loading failed, with the reason
    Error(String),
}

/// An in-memory universe of classes, filled in by definitions made in code and by class files
/// pulled from a loader on demand.
#[derive(Debug)]
pub struct ClassUniverse<L: ClassFileLoader = EmptyLoader> {
    /// Whether to log that we're loading a class
    /// Uses `tracing::info!`
    pub log_load: bool,
    class_names: ClassNames,
    map: HashMap<ClassId, ClassEntry, <HashWrapper as HashWrapperTrait<ClassId>>::HashMapHasher>,
    loader: L,
}
impl ClassUniverse<EmptyLoader> {
    #[must_use]
    pub fn empty() -> ClassUniverse<EmptyLoader> {
        ClassUniverse::new(EmptyLoader)
    }
}
impl<L: ClassFileLoader> ClassUniverse<L> {
    pub fn new(loader: L) -> ClassUniverse<L> {
        ClassUniverse {
            log_load: false,
            class_names: ClassNames::new(),
            map: HashMap::default(),
            loader,
        }
    }

    #[must_use]
    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Read the bytes of a class file through the loader, without defining the class
    pub fn read_class_file(
        &mut self,
        class_name: &str,
    ) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        self.loader
            .load_class_file(&util::internal_name_from_class_name(class_name))
    }

    /// The reason a class failed to load
    #[must_use]
    pub fn load_error(&self, id: ClassId) -> Option<&str> {
        match self.map.get(&id) {
            Some(ClassEntry::Error(reason)) => Some(reason),
            _ => None,
        }
    }

    fn data(&self, id: ClassId) -> Option<&ClassData> {
        match self.map.get(&id) {
            Some(ClassEntry::Loaded(data)) => Some(data),
            _ => None,
        }
    }

    fn name(&self, id: ClassId) -> &str {
        self.class_names
            .name_from_gcid(id)
            .map_or("", |(name, _)| name)
    }

    /// Define a class from code.
    /// The class must not already be loaded.
    pub fn define(&mut self, definition: ClassDefinition) -> Result<ClassId, ClassFormatError> {
        if !names::is_legal_name(
            &util::internal_name_from_class_name(&definition.name),
            names::NameKind::Class,
        ) {
            return Err(ClassFormatError::IllegalName {
                name: definition.name,
                kind: names::NameKind::Class.as_str(),
            });
        }
        let id = self.class_names.gcid_from_str(&definition.name);
        let super_class = definition
            .super_class
            .as_deref()
            .map(|name| self.class_names.gcid_from_str(name));
        let interfaces = definition
            .interfaces
            .iter()
            .map(|name| self.class_names.gcid_from_str(name))
            .collect();
        self.define_class(
            id,
            definition.access,
            super_class,
            interfaces,
            &definition.fields,
            &definition.methods,
        )?;
        Ok(id)
    }

    /// Define a class from its parsed class file
    pub fn define_class_file(&mut self, class_file: &ClassFile) -> Result<(), ClassFormatError> {
        self.define_class(
            class_file.id,
            class_file.access,
            class_file.super_class,
            class_file.interfaces.iter().copied().collect(),
            &class_file.fields,
            &class_file.methods,
        )
    }

    fn define_class(
        &mut self,
        id: ClassId,
        access: ClassAccess,
        super_class: Option<ClassId>,
        interfaces: SmallVec<[ClassId; 4]>,
        fields: &[FieldDecl],
        methods: &[MethodDecl],
    ) -> Result<(), ClassFormatError> {
        if self.map.contains_key(&id) {
            tracing::warn!("Duplicate definition of class {}", self.name(id));
        }

        let supers: SmallVec<[ClassId; 8]> = super_class
            .into_iter()
            .chain(interfaces.iter().copied())
            .collect();

        let mut data = ClassData::empty(access);
        data.super_class = super_class;
        data.interfaces = interfaces;

        for field in fields {
            if !names::is_field_type(&field.descriptor) {
                return Err(ClassFormatError::IllegalDescriptor {
                    descriptor: field.descriptor.clone(),
                });
            }
            let field_type = self
                .class_names
                .gcid_from_str(&names::class_name_from_descriptor(&field.descriptor));
            data.fields.push(FieldInfo {
                declaring_class: id,
                name: field.name.clone(),
                field_type,
                access: field.access,
            });
        }

        for method in methods {
            let is_constructor = method.name == "<init>";
            let parts = names::verify_method_type(
                &method.descriptor,
                method.name.starts_with('<'),
                method.is_static(),
            )?;
            let parameters = parts
                .parameters
                .iter()
                .map(|param| {
                    self.class_names
                        .gcid_from_str(&names::class_name_from_descriptor(param))
                })
                .collect();
            let mut access = method.access;
            let return_type = if is_constructor {
                access |= MemberAccess::STATIC;
                id
            } else {
                self.class_names
                    .gcid_from_str(&names::class_name_from_descriptor(parts.return_type))
            };
            data.methods.push(MethodInfo {
                declaring_class: id,
                name: method.name.clone(),
                signature: MethodSignature {
                    parameters,
                    return_type,
                    parameter_slots: parts.parameter_slots,
                },
                access,
            });
        }

        if self.log_load {
            tracing::info!("====> C{}", self.name(id));
        }
        self.map.insert(id, ClassEntry::Loaded(data));

        // Supertypes are loaded after the class is in the map so that a cycle terminates
        for super_id in supers {
            if self.load_class(super_id) != ClassState::Loaded {
                let reason = format!("failed to load supertype {}", self.name(super_id));
                self.map.insert(id, ClassEntry::Error(reason));
                return Ok(());
            }
        }

        if self.is_circular(id) {
            self.map
                .insert(id, ClassEntry::Error("class circularity".to_owned()));
        }

        Ok(())
    }

    /// Check whether the supertypes of a class lead back to it
    fn is_circular(&self, id: ClassId) -> bool {
        let mut seen = HashSet::new();
        let mut pending: SmallVec<[ClassId; 8]> = SmallVec::new();
        if let Some(data) = self.data(id) {
            pending.extend(data.super_class);
            pending.extend(data.interfaces.iter().copied());
        }
        while let Some(current) = pending.pop() {
            if current == id {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(data) = self.data(current) {
                pending.extend(data.super_class);
                pending.extend(data.interfaces.iter().copied());
            }
        }
        false
    }

    fn load_from_loader(&mut self, id: ClassId, name: &str) {
        let internal_name = util::internal_name_from_class_name(name);
        let bytes = match self.loader.load_class_file(&internal_name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.map
                    .insert(id, ClassEntry::Error("no class file".to_owned()));
                return;
            }
            Err(err) => {
                tracing::warn!("Failed to load class file for {}: {}", name, err);
                self.map.insert(id, ClassEntry::Error(err.to_string()));
                return;
            }
        };

        let class_file = match ClassFile::parse(&bytes, self) {
            Ok(class_file) => class_file,
            Err(err) => {
                tracing::warn!("Failed to parse class file for {}: {}", name, err);
                self.map.insert(id, ClassEntry::Error(err.to_string()));
                return;
            }
        };

        if class_file.id != id {
            let reason = format!("class file has the wrong name {}", class_file.internal_name);
            self.map.insert(id, ClassEntry::Error(reason));
            return;
        }

        if let Err(err) = self.define_class_file(&class_file) {
            self.map.insert(id, ClassEntry::Error(err.to_string()));
        }
    }

    fn load_array(&mut self, id: ClassId, name: &str) {
        let component_name = match names::array_component_name(name) {
            Some(component_name) => component_name.into_owned(),
            None => {
                self.map
                    .insert(id, ClassEntry::Error("bad array name".to_owned()));
                return;
            }
        };
        let component = self.class_names.gcid_from_str(&component_name);
        if self.load_class(component) != ClassState::Loaded {
            let reason = format!("failed to load component {}", component_name);
            self.map.insert(id, ClassEntry::Error(reason));
            return;
        }

        let object = self.class_names.object_id();
        // Arrays are as accessible as their element type
        let component_access = self
            .data(component)
            .map_or(ClassAccess::empty(), |data| data.access);
        let mut data = ClassData::empty(
            (component_access & ClassAccess::PUBLIC) | ClassAccess::FINAL | ClassAccess::ABSTRACT,
        );
        data.super_class = Some(object);
        data.component = Some(component);
        self.map.insert(id, ClassEntry::Loaded(data));
        self.load_class(object);
    }

    /// Walk from an array to its innermost element type
    fn element_type(&self, mut id: ClassId) -> ClassId {
        while let Some(component) = self.data(id).and_then(|data| data.component) {
            id = component;
        }
        id
    }

    fn is_same_package(&self, a: ClassId, b: ClassId) -> bool {
        names::package_of(self.name(self.element_type(a)))
            == names::package_of(self.name(self.element_type(b)))
    }

    fn is_member_accessible(
        &self,
        declaring: ClassId,
        access: MemberAccess,
        from: ClassId,
    ) -> bool {
        if access.contains(MemberAccess::PUBLIC) {
            true
        } else if access.contains(MemberAccess::PRIVATE) {
            declaring == from
        } else if access.contains(MemberAccess::PROTECTED) {
            self.is_same_package(declaring, from) || self.is_assignable_from(declaring, from)
        } else {
            self.is_same_package(declaring, from)
        }
    }

    /// Whether `target` is `source` or one of its supertypes, for non-array classes
    fn is_subtype(&self, source: ClassId, target: ClassId) -> bool {
        let mut seen = HashSet::new();
        let mut pending: SmallVec<[ClassId; 8]> = SmallVec::new();
        pending.push(source);
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(data) = self.data(current) {
                pending.extend(data.super_class);
                pending.extend(data.interfaces.iter().copied());
            }
        }
        false
    }

    fn find_field(
        &self,
        class: ClassId,
        name: &str,
        field_type: ClassId,
        is_static: bool,
    ) -> Option<FieldId> {
        let data = self.data(class)?;
        let own = data.fields.iter().position(|field| {
            field.name == name && field.field_type == field_type && field.is_static() == is_static
        });
        if let Some(index) = own {
            return Some(FieldId::unchecked_compose(class, index as u16));
        }

        for interface in &data.interfaces {
            if let Some(field) = self.find_field(*interface, name, field_type, is_static) {
                return Some(field);
            }
        }

        data.super_class
            .and_then(|super_class| self.find_field(super_class, name, field_type, is_static))
    }

    /// Search the methods declared directly by every superinterface of `class`
    fn find_interface_method(
        &self,
        class: ClassId,
        matches: &impl Fn(&MethodInfo) -> bool,
        seen: &mut HashSet<ClassId>,
    ) -> Option<MethodId> {
        let data = self.data(class)?;
        for interface in &data.interfaces {
            if !seen.insert(*interface) {
                continue;
            }
            if let Some(interface_data) = self.data(*interface) {
                let found = interface_data
                    .methods
                    .iter()
                    .position(|method| !method.is_static() && matches(method));
                if let Some(index) = found {
                    return Some(MethodId::unchecked_compose(*interface, index as u16));
                }
            }
            if let Some(method) = self.find_interface_method(*interface, matches, seen) {
                return Some(method);
            }
        }

        data.super_class
            .and_then(|super_class| self.find_interface_method(super_class, matches, seen))
    }
}

impl<L: ClassFileLoader> SymbolTable for ClassUniverse<L> {
    fn class_id(&mut self, name: &str) -> ClassId {
        self.class_names.gcid_from_str(name)
    }

    fn class_name(&self, id: ClassId) -> Option<&str> {
        self.class_names.name_from_gcid(id).map(|(name, _)| name)
    }

    fn load_class(&mut self, id: ClassId) -> ClassState {
        if self.map.contains_key(&id) {
            return self.class_state(id);
        }

        let (name, info) = match self.class_names.name_from_gcid(id) {
            Some((name, info)) => (name.to_owned(), info.clone()),
            None => return ClassState::Error,
        };

        if info.is_primitive() {
            let access = ClassAccess::PUBLIC | ClassAccess::FINAL | ClassAccess::ABSTRACT;
            self.map
                .insert(id, ClassEntry::Loaded(ClassData::empty(access)));
        } else if info.is_array() {
            self.load_array(id, &name);
        } else {
            self.load_from_loader(id, &name);
        }

        self.class_state(id)
    }

    fn class_state(&self, id: ClassId) -> ClassState {
        match self.map.get(&id) {
            None => ClassState::Unloaded,
            Some(ClassEntry::Loaded(_)) => ClassState::Loaded,
            Some(ClassEntry::Error(_)) => ClassState::Error,
        }
    }

    fn class_access(&self, id: ClassId) -> Option<ClassAccess> {
        self.data(id).map(|data| data.access)
    }

    fn super_class(&self, id: ClassId) -> Option<ClassId> {
        self.data(id).and_then(|data| data.super_class)
    }

    fn component_type(&self, id: ClassId) -> Option<ClassId> {
        self.data(id).and_then(|data| data.component)
    }

    fn is_assignable_from(&self, target: ClassId, source: ClassId) -> bool {
        if target == source {
            return true;
        }

        if self.class_names.is_primitive(target) || self.class_names.is_primitive(source) {
            return false;
        }

        if target == self.class_names.object_id() {
            return true;
        }

        if let Some(source_component) = self.component_type(source) {
            let target_name = self.name(target);
            if target_name == "java.lang.Cloneable" || target_name == "java.io.Serializable" {
                return true;
            }

            return match self.component_type(target) {
                Some(target_component) => {
                    if self.class_names.is_primitive(target_component)
                        || self.class_names.is_primitive(source_component)
                    {
                        target_component == source_component
                    } else {
                        self.is_assignable_from(target_component, source_component)
                    }
                }
                None => false,
            };
        }

        self.is_subtype(source, target)
    }

    fn is_accessible_from(&self, class: ClassId, from: ClassId) -> bool {
        let element = self.element_type(class);
        if self.class_names.is_primitive(element) {
            return true;
        }

        match self.class_access(element) {
            Some(access) if access.contains(ClassAccess::PUBLIC) => true,
            _ => self.is_same_package(element, from),
        }
    }

    fn lookup_field(
        &self,
        class: ClassId,
        name: &str,
        field_type: ClassId,
        is_static: bool,
    ) -> Option<FieldId> {
        self.find_field(class, name, field_type, is_static)
    }

    fn lookup_method(
        &self,
        class: ClassId,
        name: &str,
        parameters: &[ClassId],
        return_type: ClassId,
        requesting_class: ClassId,
        is_static: bool,
    ) -> Option<MethodId> {
        let matches = |method: &MethodInfo| {
            method.name == name
                && method.signature.return_type == return_type
                && method.signature.parameters.as_slice() == parameters
                && method.is_static() == is_static
        };

        // The class and its superclasses
        let mut current = Some(class);
        while let Some(current_id) = current {
            // A superclass that failed to load ends the chain, the interfaces are still searched
            let data = match self.data(current_id) {
                Some(data) => data,
                None => break,
            };
            let inherited = current_id != class;
            let found = data.methods.iter().position(|method| {
                if inherited {
                    // Constructors and initializers are not inherited, private methods are only
                    // visible to the class that declares them
                    if method.name.starts_with('<') {
                        return false;
                    }
                    if method.access.contains(MemberAccess::PRIVATE)
                        && requesting_class != current_id
                    {
                        return false;
                    }
                }
                matches(method)
            });
            if let Some(index) = found {
                return Some(MethodId::unchecked_compose(current_id, index as u16));
            }
            current = data.super_class;
        }

        // Then the superinterfaces
        if !is_static {
            let mut seen = HashSet::new();
            if let Some(method) = self.find_interface_method(class, &matches, &mut seen) {
                return Some(method);
            }
        }

        // Interfaces have the public methods of Object
        let object = self.class_names.object_id();
        if self.is_interface(class) && class != object {
            let data = self.data(object)?;
            let found = data.methods.iter().position(|method| {
                method.access.contains(MemberAccess::PUBLIC) && !method.name.starts_with('<')
                    && matches(method)
            });
            if let Some(index) = found {
                return Some(MethodId::unchecked_compose(object, index as u16));
            }
        }

        None
    }

    fn field(&self, id: FieldId) -> Option<&FieldInfo> {
        let (class, index) = id.decompose();
        self.data(class)?.fields.get(usize::from(index))
    }

    fn method(&self, id: MethodId) -> Option<&MethodInfo> {
        let (class, index) = id.decompose();
        self.data(class)?.methods.get(usize::from(index))
    }

    fn is_field_accessible_from(&self, field: FieldId, from: ClassId) -> bool {
        self.field(field).map_or(false, |info| {
            self.is_member_accessible(info.declaring_class, info.access, from)
        })
    }

    fn is_method_accessible_from(&self, method: MethodId, from: ClassId) -> bool {
        self.method(method).map_or(false, |info| {
            self.is_member_accessible(info.declaring_class, info.access, from)
        })
    }
}
