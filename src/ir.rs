use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::GraphError;
use crate::opcodes;

/// Identity of one loaded class declaration.
///
/// Every [`Class`] receives a fresh id when it is constructed, so two classes
/// with the same name (a replaced class, or copies in different resources)
/// never share an identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ClassId(u64);

impl ClassId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ClassId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of one declared method: the declaring class identity plus the
/// method's position in that class's method table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MethodKey {
    pub class: ClassId,
    pub index: u16,
}

/// Intermediate representation for a loaded JVM class.
#[derive(Debug)]
pub struct Class {
    id: ClassId,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: ClassAccess,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn new(name: impl Into<String>, super_name: Option<String>) -> Self {
        Self {
            id: ClassId::next(),
            name: name.into(),
            super_name,
            interfaces: Vec::new(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_interfaces(mut self, interfaces: Vec<String>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_access(mut self, access: ClassAccess) -> Self {
        self.access = access;
        self
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    /// Attach the method table, stamping each method with its [`MethodKey`].
    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        for (index, method) in self.methods.iter_mut().enumerate() {
            method.key = MethodKey {
                class: self.id,
                index: index as u16,
            };
        }
        self
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn method_by_key(&self, key: MethodKey) -> Option<&Method> {
        if key.class != self.id {
            return None;
        }
        self.methods.get(key.index as usize)
    }

    pub fn field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }
}

/// Class access flags relevant to linkage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClassAccess {
    pub is_interface: bool,
    pub is_abstract: bool,
}

/// Intermediate representation for a method and its invocation instructions.
#[derive(Debug)]
pub struct Method {
    key: MethodKey,
    pub name: String,
    pub descriptor: String,
    pub access: MethodAccess,
    /// Invocation instructions in code order. Other opcodes are not retained.
    pub instructions: Vec<Instruction>,
}

impl Method {
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: MethodAccess,
    ) -> Self {
        Self {
            key: MethodKey {
                class: ClassId(0),
                index: 0,
            },
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn key(&self) -> MethodKey {
        self.key
    }
}

/// Method access flags used by resolution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MethodAccess {
    pub is_public: bool,
    pub is_private: bool,
    pub is_static: bool,
    pub is_abstract: bool,
}

/// Field declaration.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub offset: u32,
    pub kind: InstructionKind,
}

/// Instruction kinds needed for call graph construction.
#[derive(Clone, Debug)]
pub enum InstructionKind {
    Invoke(CallSite),
    InvokeDynamic(DynamicCallSite),
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug)]
pub struct CallSite {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub kind: CallKind,
    pub is_interface: bool,
}

/// `invokedynamic` site with its resolved bootstrap method and arguments.
#[derive(Clone, Debug)]
pub struct DynamicCallSite {
    pub name: String,
    pub descriptor: String,
    pub bootstrap: MethodHandle,
    pub arguments: Vec<BootstrapArgument>,
}

/// Constant-pool method handle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodHandle {
    /// JVMS reference kind (`REF_invokeVirtual` = 5 and so on).
    pub kind: u8,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

/// Static argument passed to a bootstrap method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BootstrapArgument {
    MethodHandle(MethodHandle),
    MethodType(String),
    Other,
}

/// Call opcode classification used for linkage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl CallKind {
    pub fn from_opcode(opcode: u8) -> Result<Self, GraphError> {
        match opcode {
            opcodes::INVOKEVIRTUAL => Ok(CallKind::Virtual),
            opcodes::INVOKEINTERFACE => Ok(CallKind::Interface),
            opcodes::INVOKESPECIAL => Ok(CallKind::Special),
            opcodes::INVOKESTATIC => Ok(CallKind::Static),
            _ => Err(GraphError::InvalidOpcode(opcode)),
        }
    }

    /// Map a method-handle reference kind onto the equivalent invocation.
    /// `REF_newInvokeSpecial` and field handles are not invocations.
    pub fn from_handle_kind(kind: u8) -> Result<Self, GraphError> {
        match kind {
            opcodes::H_INVOKEVIRTUAL => Ok(CallKind::Virtual),
            opcodes::H_INVOKEINTERFACE => Ok(CallKind::Interface),
            opcodes::H_INVOKESPECIAL => Ok(CallKind::Special),
            opcodes::H_INVOKESTATIC => Ok(CallKind::Static),
            _ => Err(GraphError::InvalidHandleKind(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_methods_stamps_keys_for_owning_class() {
        let class = Class::new("com/example/App", None).with_methods(vec![
            Method::new("a", "()V", MethodAccess::default()),
            Method::new("b", "()V", MethodAccess::default()),
        ]);

        let second = class.method("b", "()V").expect("method b");
        assert_eq!(second.key().class, class.id());
        assert_eq!(second.key().index, 1);
        assert!(class.method_by_key(second.key()).is_some());
    }

    #[test]
    fn identical_classes_have_distinct_identities() {
        let first = Class::new("com/example/App", None)
            .with_methods(vec![Method::new("run", "()V", MethodAccess::default())]);
        let second = Class::new("com/example/App", None)
            .with_methods(vec![Method::new("run", "()V", MethodAccess::default())]);

        assert_ne!(first.id(), second.id());
        assert_ne!(first.methods[0].key(), second.methods[0].key());
        assert!(first.method_by_key(second.methods[0].key()).is_none());
    }

    #[test]
    fn call_kind_rejects_non_invocation_opcodes() {
        assert_eq!(CallKind::from_opcode(0xb8).expect("static"), CallKind::Static);
        assert!(matches!(
            CallKind::from_opcode(opcodes::INVOKEDYNAMIC),
            Err(GraphError::InvalidOpcode(0xba))
        ));
        assert!(matches!(
            CallKind::from_handle_kind(opcodes::H_NEWINVOKESPECIAL),
            Err(GraphError::InvalidHandleKind(8))
        ));
    }
}
