//! Builders for the byte level structures that tests feed in, and a small universe of the
//! classes that the core of the library refers to by name.

use std::collections::HashMap;

use crate::{
    code::{CodeParser, MethodContext},
    constant_pool::{tag, ConstantPool},
    data::{
        class_file_loader::ClassFileLoader,
        classes::{ClassDefinition, ClassUniverse},
    },
    error::{ClassFormatError, TranslateError},
    id::ClassId,
    reader::ClassFileReader,
    symbols::{ClassAccess, MemberAccess},
    Config,
};

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Builds the bytes of a constant pool, starting with its `u2` count.
/// Utf8, class and name and type entries are shared when added twice.
#[derive(Debug, Clone)]
pub(crate) struct PoolBuilder {
    data: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    name_and_types: HashMap<(String, String), u16>,
}
impl PoolBuilder {
    pub fn new() -> PoolBuilder {
        PoolBuilder {
            data: Vec::new(),
            next: 1,
            utf8: HashMap::new(),
            classes: HashMap::new(),
            name_and_types: HashMap::new(),
        }
    }

    fn push(&mut self, tag: u8, payload: &[u8], slots: u16) -> u16 {
        let index = self.next;
        self.data.push(tag);
        self.data.extend_from_slice(payload);
        self.next += slots;
        index
    }

    /// Add an entry with any tag and payload
    pub fn raw(&mut self, tag: u8, payload: &[u8]) -> u16 {
        self.push(tag, payload, 1)
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(index) = self.utf8.get(text) {
            return *index;
        }
        let bytes = cesu8::to_java_cesu8(text);
        let mut payload = Vec::with_capacity(bytes.len() + 2);
        push_u16(&mut payload, bytes.len() as u16);
        payload.extend_from_slice(&bytes);
        let index = self.push(tag::UTF8, &payload, 1);
        self.utf8.insert(text.to_owned(), index);
        index
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(tag::INTEGER, &value.to_be_bytes(), 1)
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.push(tag::FLOAT, &value.to_be_bytes(), 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.push(tag::LONG, &value.to_be_bytes(), 2)
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.push(tag::DOUBLE, &value.to_be_bytes(), 2)
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8(text);
        self.push(tag::STRING, &utf8.to_be_bytes(), 1)
    }

    /// Add a class entry, by its internal name (`java/lang/Object`)
    pub fn class(&mut self, internal_name: &str) -> u16 {
        if let Some(index) = self.classes.get(internal_name) {
            return *index;
        }
        let utf8 = self.utf8(internal_name);
        let index = self.push(tag::CLASS, &utf8.to_be_bytes(), 1);
        self.classes.insert(internal_name.to_owned(), index);
        index
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let key = (name.to_owned(), descriptor.to_owned());
        if let Some(index) = self.name_and_types.get(&key) {
            return *index;
        }
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut payload = Vec::with_capacity(4);
        push_u16(&mut payload, name);
        push_u16(&mut payload, descriptor);
        let index = self.push(tag::NAME_AND_TYPE, &payload, 1);
        self.name_and_types.insert(key, index);
        index
    }

    fn member(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        let mut payload = Vec::with_capacity(4);
        push_u16(&mut payload, class);
        push_u16(&mut payload, name_and_type);
        self.push(tag, &payload, 1)
    }

    pub fn fieldref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(tag::FIELD_REF, class, name, descriptor)
    }

    pub fn methodref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(tag::METHOD_REF, class, name, descriptor)
    }

    pub fn interface_methodref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(tag::INTERFACE_METHOD_REF, class, name, descriptor)
    }

    /// The bytes of the pool with a count that might not match the entries
    pub fn bytes_with_count(&self, count: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        push_u16(&mut out, count);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes_with_count(self.next)
    }

    pub fn parse(&self) -> Result<ConstantPool, ClassFormatError> {
        PoolBuilder::parse_bytes(&self.bytes())
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<ConstantPool, ClassFormatError> {
        ConstantPool::parse(&mut ClassFileReader::new(bytes))
    }
}

/// A verification type in a `StackMap` frame
#[derive(Debug, Clone, Copy)]
pub(crate) enum VType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// A class constant pool index
    Object(u16),
    /// The address of the `new`
    Uninitialized(u16),
}
impl VType {
    fn write(self, out: &mut Vec<u8>) {
        match self {
            VType::Top => out.push(0),
            VType::Integer => out.push(1),
            VType::Float => out.push(2),
            VType::Double => out.push(3),
            VType::Long => out.push(4),
            VType::Null => out.push(5),
            VType::UninitializedThis => out.push(6),
            VType::Object(index) => {
                out.push(7);
                push_u16(out, index);
            }
            VType::Uninitialized(address) => {
                out.push(8);
                push_u16(out, address);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub offset: u16,
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

/// Builds the body of a `Code` attribute
#[derive(Debug, Clone)]
pub(crate) struct CodeBuilder {
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    handlers: Vec<[u16; 4]>,
    attributes: Vec<(u16, Vec<u8>)>,
}
impl CodeBuilder {
    pub fn new(max_stack: u16, max_locals: u16, code: &[u8]) -> CodeBuilder {
        CodeBuilder {
            max_stack,
            max_locals,
            code: code.to_vec(),
            handlers: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Add an exception handler, a `catch_type` of zero catches everything
    pub fn handler(&mut self, start: u16, end: u16, handler: u16, catch_type: u16) -> &mut Self {
        self.handlers.push([start, end, handler, catch_type]);
        self
    }

    pub fn attribute(&mut self, name_index: u16, body: Vec<u8>) -> &mut Self {
        self.attributes.push((name_index, body));
        self
    }

    /// Add a CLDC `StackMap` attribute
    pub fn stack_map(&mut self, pool: &mut PoolBuilder, frames: &[Frame]) -> &mut Self {
        let mut body = Vec::new();
        push_u16(&mut body, frames.len() as u16);
        for frame in frames {
            push_u16(&mut body, frame.offset);
            push_u16(&mut body, frame.locals.len() as u16);
            for local in &frame.locals {
                local.write(&mut body);
            }
            push_u16(&mut body, frame.stack.len() as u16);
            for item in &frame.stack {
                item.write(&mut body);
            }
        }
        let name = pool.utf8("StackMap");
        self.attribute(name, body)
    }

    /// Add a `LineNumberTable` of `(address, line)`
    pub fn line_numbers(&mut self, pool: &mut PoolBuilder, entries: &[(u16, u16)]) -> &mut Self {
        let mut body = Vec::new();
        push_u16(&mut body, entries.len() as u16);
        for (address, line) in entries {
            push_u16(&mut body, *address);
            push_u16(&mut body, *line);
        }
        let name = pool.utf8("LineNumberTable");
        self.attribute(name, body)
    }

    /// Add a `LocalVariableTable` of `(start, length, name, descriptor, index)`
    pub fn local_variables(
        &mut self,
        pool: &mut PoolBuilder,
        entries: &[(u16, u16, &str, &str, u16)],
    ) -> &mut Self {
        let mut body = Vec::new();
        push_u16(&mut body, entries.len() as u16);
        for (start, length, name, descriptor, index) in entries {
            push_u16(&mut body, *start);
            push_u16(&mut body, *length);
            push_u16(&mut body, pool.utf8(name));
            push_u16(&mut body, pool.utf8(descriptor));
            push_u16(&mut body, *index);
        }
        let name = pool.utf8("LocalVariableTable");
        self.attribute(name, body)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_u16(&mut out, self.max_stack);
        push_u16(&mut out, self.max_locals);
        push_u32(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);
        push_u16(&mut out, self.handlers.len() as u16);
        for handler in &self.handlers {
            for value in handler {
                push_u16(&mut out, *value);
            }
        }
        push_u16(&mut out, self.attributes.len() as u16);
        for (name, body) in &self.attributes {
            push_u16(&mut out, *name);
            push_u32(&mut out, body.len() as u32);
            out.extend_from_slice(body);
        }
        out
    }
}

struct MethodEntry {
    access: MemberAccess,
    name: u16,
    descriptor: u16,
    code: Option<Vec<u8>>,
}

/// Builds a whole class file
pub(crate) struct ClassFileBuilder {
    pool: PoolBuilder,
    access: ClassAccess,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<(MemberAccess, u16, u16)>,
    methods: Vec<MethodEntry>,
    code_name: u16,
}
impl ClassFileBuilder {
    pub fn new(internal_name: &str, super_class: Option<&str>) -> ClassFileBuilder {
        let mut pool = PoolBuilder::new();
        let this_class = pool.class(internal_name);
        let super_class = super_class.map_or(0, |name| pool.class(name));
        let code_name = pool.utf8("Code");
        ClassFileBuilder {
            pool,
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            code_name,
        }
    }

    /// The constant pool, for the indices that method bodies use
    pub fn pool(&mut self) -> &mut PoolBuilder {
        &mut self.pool
    }

    pub fn interface(&mut self, internal_name: &str) -> &mut Self {
        let index = self.pool.class(internal_name);
        self.interfaces.push(index);
        self
    }

    pub fn field(&mut self, name: &str, descriptor: &str, access: MemberAccess) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.fields.push((access, name, descriptor));
        self
    }

    /// Add a method, `code` is the body of its `Code` attribute
    pub fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        access: MemberAccess,
        code: Option<Vec<u8>>,
    ) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.methods.push(MethodEntry {
            access,
            name,
            descriptor,
            code,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, crate::class_file::MAGIC);
        // minor, major
        push_u16(&mut out, 0);
        push_u16(&mut out, 50);
        out.extend_from_slice(&self.pool.bytes());
        push_u16(&mut out, self.access.bits());
        push_u16(&mut out, self.this_class);
        push_u16(&mut out, self.super_class);

        push_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            push_u16(&mut out, *interface);
        }

        push_u16(&mut out, self.fields.len() as u16);
        for (access, name, descriptor) in &self.fields {
            push_u16(&mut out, access.bits());
            push_u16(&mut out, *name);
            push_u16(&mut out, *descriptor);
            push_u16(&mut out, 0);
        }

        push_u16(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            push_u16(&mut out, method.access.bits());
            push_u16(&mut out, method.name);
            push_u16(&mut out, method.descriptor);
            match &method.code {
                Some(code) => {
                    push_u16(&mut out, 1);
                    push_u16(&mut out, self.code_name);
                    push_u32(&mut out, code.len() as u32);
                    out.extend_from_slice(code);
                }
                None => push_u16(&mut out, 0),
            }
        }

        // class attributes
        push_u16(&mut out, 0);
        out
    }
}

/// Define the classes that the library itself names, and a few that tests use
pub(crate) fn define_bootstrap<L: ClassFileLoader>(universe: &mut ClassUniverse<L>) {
    let interface = ClassAccess::PUBLIC | ClassAccess::INTERFACE | ClassAccess::ABSTRACT;
    let public = MemberAccess::PUBLIC;
    let definitions = [
        ClassDefinition::new("java.lang.Object")
            .method("<init>", "()V", public)
            .method("hashCode", "()I", public)
            .method("toString", "()Ljava/lang/String;", public)
            .method("equals", "(Ljava/lang/Object;)Z", public),
        ClassDefinition::new("java.lang.Cloneable").access(interface),
        ClassDefinition::new("java.io.Serializable").access(interface),
        ClassDefinition::new("java.lang.String")
            .access(ClassAccess::PUBLIC | ClassAccess::FINAL | ClassAccess::SUPER)
            .interface("java.io.Serializable")
            .method("<init>", "()V", public)
            .method("length", "()I", public),
        ClassDefinition::new("java.lang.Throwable")
            .interface("java.io.Serializable")
            .method("<init>", "()V", public)
            .method("getMessage", "()Ljava/lang/String;", public),
        ClassDefinition::new("java.lang.Exception")
            .super_class("java.lang.Throwable")
            .method("<init>", "()V", public),
        ClassDefinition::new("java.lang.RuntimeException")
            .super_class("java.lang.Exception")
            .method("<init>", "()V", public),
        ClassDefinition::new("java.io.PrintStream")
            .method("println", "()V", public)
            .method("println", "(I)V", public)
            .method("println", "(J)V", public)
            .method("println", "(Ljava/lang/String;)V", public)
            .method("println", "(Ljava/lang/Object;)V", public),
        ClassDefinition::new("java.lang.System").field(
            "out",
            "Ljava/io/PrintStream;",
            MemberAccess::PUBLIC | MemberAccess::STATIC | MemberAccess::FINAL,
        ),
    ];
    for definition in definitions {
        if let Err(err) = universe.define(definition) {
            panic!("bootstrap class failed to define: {}", err);
        }
    }
}

pub(crate) fn bootstrap_universe() -> ClassUniverse {
    let mut universe = ClassUniverse::empty();
    define_bootstrap(&mut universe);
    universe
}

/// Everything a [`CodeParser`] borrows, for a method of `test.Main`
pub(crate) struct MethodFixture {
    pub universe: ClassUniverse,
    pub pool: ConstantPool,
    pub class: ClassId,
    pub config: Config,
}
impl MethodFixture {
    pub fn new(pool: &PoolBuilder) -> MethodFixture {
        let mut universe = bootstrap_universe();
        let class = universe
            .define(ClassDefinition::new("test.Main"))
            .expect("test.Main should define");
        let mut pool = pool.parse().expect("constant pool should parse");
        pool.set_defining_class(class);
        MethodFixture {
            universe,
            pool,
            class,
            config: Config::default(),
        }
    }

    pub fn parser<'f>(
        &'f mut self,
        name: &'f str,
        descriptor: &'f str,
        is_static: bool,
        attribute: &'f [u8],
    ) -> Result<CodeParser<'f, ClassUniverse>, TranslateError> {
        let context = MethodContext {
            class: self.class,
            name,
            descriptor,
            is_static,
        };
        CodeParser::new(
            attribute,
            &mut self.pool,
            &mut self.universe,
            &self.config,
            context,
        )
    }
}
