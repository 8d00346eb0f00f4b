use anyhow::{Context, Result};
use jclassfile::attributes::{Attribute, BootstrapMethodRecord};
use jclassfile::class_file::{self, ClassFlags};
use jclassfile::constant_pool::ConstantPool;
use jclassfile::methods::{MethodFlags, MethodInfo};

use crate::ir::{
    BootstrapArgument, CallKind, CallSite, Class, ClassAccess, DynamicCallSite, Field,
    Instruction, InstructionKind, Method, MethodAccess, MethodHandle,
};
use crate::opcodes;

/// Parse class file bytes into the linkage model.
pub fn parse_class(data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file")?;
    let pool = Pool(class_file.constant_pool());

    let name = pool.class_name(class_file.this_class())?.to_string();
    let super_name = match class_file.super_class() {
        0 => None,
        index => Some(pool.class_name(index)?.to_string()),
    };
    let interfaces = class_file
        .interfaces()
        .iter()
        .map(|index| pool.class_name(*index).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;

    let bootstrap_methods = class_file
        .attributes()
        .iter()
        .find_map(|attribute| match attribute {
            Attribute::BootstrapMethods { bootstrap_methods } => Some(bootstrap_methods.as_slice()),
            _ => None,
        })
        .unwrap_or(&[]);

    let fields = class_file
        .fields()
        .iter()
        .map(|field| {
            Ok(Field {
                name: pool.utf8(field.name_index())?.to_string(),
                descriptor: pool.utf8(field.descriptor_index())?.to_string(),
                is_static: field
                    .access_flags()
                    .contains(jclassfile::fields::FieldFlags::ACC_STATIC),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let methods = class_file
        .methods()
        .iter()
        .map(|method| {
            parse_method(&pool, method, bootstrap_methods)
                .with_context(|| format!("failed to read method of {name}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let flags = class_file.access_flags();
    let access = ClassAccess {
        is_interface: flags.contains(ClassFlags::ACC_INTERFACE),
        is_abstract: flags.contains(ClassFlags::ACC_ABSTRACT),
    };

    Ok(Class::new(name, super_name)
        .with_access(access)
        .with_interfaces(interfaces)
        .with_fields(fields)
        .with_methods(methods))
}

fn parse_method(
    pool: &Pool<'_>,
    method: &MethodInfo,
    bootstrap_methods: &[BootstrapMethodRecord],
) -> Result<Method> {
    let name = pool.utf8(method.name_index())?;
    let descriptor = pool.utf8(method.descriptor_index())?;
    let flags = method.access_flags();
    let access = MethodAccess {
        is_public: flags.contains(MethodFlags::ACC_PUBLIC),
        is_private: flags.contains(MethodFlags::ACC_PRIVATE),
        is_static: flags.contains(MethodFlags::ACC_STATIC),
        is_abstract: flags.contains(MethodFlags::ACC_ABSTRACT),
    };

    let mut instructions = Vec::new();
    for attribute in method.attributes() {
        if let Attribute::Code { code, .. } = attribute {
            instructions = decode_invocations(pool, code, bootstrap_methods)
                .with_context(|| format!("failed to decode {name}{descriptor}"))?;
        }
    }

    Ok(Method::new(name, descriptor, access).with_instructions(instructions))
}

/// Walk the code array once, keeping only invocation instructions.
fn decode_invocations(
    pool: &Pool<'_>,
    code: &[u8],
    bootstrap_methods: &[BootstrapMethodRecord],
) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let opcode = code[offset];
        match opcode {
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                let member = pool.method_ref(read_u16(code, offset + 1)?)?;
                instructions.push(Instruction {
                    offset: offset as u32,
                    kind: InstructionKind::Invoke(CallSite {
                        owner: member.owner.to_string(),
                        name: member.name.to_string(),
                        descriptor: member.descriptor.to_string(),
                        kind: CallKind::from_opcode(opcode)?,
                        is_interface: member.is_interface,
                    }),
                });
            }
            opcodes::INVOKEDYNAMIC => {
                let site = pool.invoke_dynamic(read_u16(code, offset + 1)?, bootstrap_methods)?;
                instructions.push(Instruction {
                    offset: offset as u32,
                    kind: InstructionKind::InvokeDynamic(site),
                });
            }
            _ => {}
        }
        offset += opcode_length(code, offset)?;
    }
    Ok(instructions)
}

struct MemberRef<'a> {
    owner: &'a str,
    name: &'a str,
    descriptor: &'a str,
    is_interface: bool,
}

/// Typed accessors over a parsed constant pool.
struct Pool<'a>(&'a [ConstantPool]);

impl<'a> Pool<'a> {
    fn entry(&self, index: u16) -> Result<&'a ConstantPool> {
        self.0
            .get(index as usize)
            .with_context(|| format!("constant pool index {index} out of range"))
    }

    fn utf8(&self, index: u16) -> Result<&'a str> {
        match self.entry(index)? {
            ConstantPool::Utf8 { value } => Ok(value.as_str()),
            other => anyhow::bail!("constant pool entry {index} is not Utf8: {other:?}"),
        }
    }

    fn class_name(&self, index: u16) -> Result<&'a str> {
        match self.entry(index)? {
            ConstantPool::Class { name_index } => self.utf8(*name_index),
            other => anyhow::bail!("constant pool entry {index} is not a class: {other:?}"),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&'a str, &'a str)> {
        match self.entry(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => anyhow::bail!("constant pool entry {index} is not NameAndType: {other:?}"),
        }
    }

    /// Operand of an invoke instruction: a method or interface method ref.
    fn method_ref(&self, index: u16) -> Result<MemberRef<'a>> {
        if let ConstantPool::Fieldref { .. } = self.entry(index)? {
            anyhow::bail!("constant pool entry {index} is a field ref, not a method ref");
        }
        self.member_ref(index)
    }

    /// Target of a method handle, which may also be a field.
    fn member_ref(&self, index: u16) -> Result<MemberRef<'a>> {
        let (class_index, name_and_type_index, is_interface) = match self.entry(index)? {
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            other => anyhow::bail!("constant pool entry {index} is not a member ref: {other:?}"),
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner: self.class_name(class_index)?,
            name,
            descriptor,
            is_interface,
        })
    }

    fn method_handle(&self, index: u16) -> Result<MethodHandle> {
        match self.entry(index)? {
            ConstantPool::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                let member = self.member_ref(*reference_index)?;
                Ok(MethodHandle {
                    kind: *reference_kind,
                    owner: member.owner.to_string(),
                    name: member.name.to_string(),
                    descriptor: member.descriptor.to_string(),
                    is_interface: member.is_interface,
                })
            }
            other => anyhow::bail!("constant pool entry {index} is not a method handle: {other:?}"),
        }
    }

    fn bootstrap_argument(&self, index: u16) -> Result<BootstrapArgument> {
        Ok(match self.entry(index)? {
            ConstantPool::MethodHandle { .. } => {
                BootstrapArgument::MethodHandle(self.method_handle(index)?)
            }
            ConstantPool::MethodType { descriptor_index } => {
                BootstrapArgument::MethodType(self.utf8(*descriptor_index)?.to_string())
            }
            _ => BootstrapArgument::Other,
        })
    }

    fn invoke_dynamic(
        &self,
        index: u16,
        bootstrap_methods: &[BootstrapMethodRecord],
    ) -> Result<DynamicCallSite> {
        let (bootstrap_index, name_and_type_index) = match self.entry(index)? {
            ConstantPool::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => (*bootstrap_method_attr_index, *name_and_type_index),
            other => anyhow::bail!("constant pool entry {index} is not InvokeDynamic: {other:?}"),
        };
        let record = bootstrap_methods
            .get(bootstrap_index as usize)
            .with_context(|| format!("bootstrap method {bootstrap_index} out of range"))?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        let arguments = record
            .bootstrap_arguments()
            .iter()
            .map(|argument| self.bootstrap_argument(*argument))
            .collect::<Result<Vec<_>>>()?;
        Ok(DynamicCallSite {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            bootstrap: self.method_handle(record.bootstrap_method_ref())?,
            arguments,
        })
    }
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = *code
        .get(offset)
        .with_context(|| format!("bytecode offset {offset} out of range"))?;
    let length = match opcode {
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_u32(code, base + 4)? as i32;
            let high = read_u32(code, base + 8)? as i32;
            let count = high
                .checked_sub(low)
                .and_then(|v| v.checked_add(1))
                .filter(|v| *v >= 0)
                .context("invalid tableswitch range")?;
            1 + padding(offset) + 12 + 4 * count as usize
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_u32(code, base + 4)? as i32;
            if npairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count {npairs}");
            }
            1 + padding(offset) + 8 + 8 * npairs as usize
        }
        opcodes::WIDE => {
            if code.get(offset + 1) == Some(&opcodes::IINC) {
                6
            } else {
                4
            }
        }
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 2,
        0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xa8 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1
        | 0xc6 | 0xc7 => 3,
        0xc5 => 4,
        0xb9 | 0xba | 0xc8 | 0xc9 => 5,
        _ => 1,
    };
    Ok(length)
}

pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("truncated bytecode at {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("truncated bytecode at {offset}"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Minimal class file writer for tests that need real class bytes.
#[cfg(test)]
pub(crate) mod writer {
    pub(crate) struct TestMethod {
        pub(crate) access: u16,
        pub(crate) name: String,
        pub(crate) descriptor: String,
        pub(crate) code: Vec<u8>,
    }

    #[derive(Default)]
    pub(crate) struct ClassWriter {
        pool: Vec<Vec<u8>>,
        bootstrap_methods: Vec<(u16, Vec<u16>)>,
    }

    impl ClassWriter {
        fn push(&mut self, entry: Vec<u8>) -> u16 {
            self.pool.push(entry);
            self.pool.len() as u16
        }

        pub(crate) fn utf8(&mut self, value: &str) -> u16 {
            let mut entry = vec![1];
            entry.extend_from_slice(&(value.len() as u16).to_be_bytes());
            entry.extend_from_slice(value.as_bytes());
            self.push(entry)
        }

        pub(crate) fn class(&mut self, name: &str) -> u16 {
            let name_index = self.utf8(name);
            let mut entry = vec![7];
            entry.extend_from_slice(&name_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
            let name_index = self.utf8(name);
            let descriptor_index = self.utf8(descriptor);
            let mut entry = vec![12];
            entry.extend_from_slice(&name_index.to_be_bytes());
            entry.extend_from_slice(&descriptor_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn method_ref(
            &mut self,
            owner: &str,
            name: &str,
            descriptor: &str,
            is_interface: bool,
        ) -> u16 {
            let class_index = self.class(owner);
            let nat_index = self.name_and_type(name, descriptor);
            let mut entry = vec![if is_interface { 11 } else { 10 }];
            entry.extend_from_slice(&class_index.to_be_bytes());
            entry.extend_from_slice(&nat_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
            let class_index = self.class(owner);
            let nat_index = self.name_and_type(name, descriptor);
            let mut entry = vec![9];
            entry.extend_from_slice(&class_index.to_be_bytes());
            entry.extend_from_slice(&nat_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn method_handle(
            &mut self,
            kind: u8,
            owner: &str,
            name: &str,
            descriptor: &str,
        ) -> u16 {
            let reference_index = self.method_ref(owner, name, descriptor, false);
            let mut entry = vec![15, kind];
            entry.extend_from_slice(&reference_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn method_type(&mut self, descriptor: &str) -> u16 {
            let descriptor_index = self.utf8(descriptor);
            let mut entry = vec![16];
            entry.extend_from_slice(&descriptor_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn invoke_dynamic(
            &mut self,
            bootstrap_method: u16,
            arguments: Vec<u16>,
            name: &str,
            descriptor: &str,
        ) -> u16 {
            self.bootstrap_methods.push((bootstrap_method, arguments));
            let bootstrap_index = (self.bootstrap_methods.len() - 1) as u16;
            let nat_index = self.name_and_type(name, descriptor);
            let mut entry = vec![18];
            entry.extend_from_slice(&bootstrap_index.to_be_bytes());
            entry.extend_from_slice(&nat_index.to_be_bytes());
            self.push(entry)
        }

        pub(crate) fn finish(
            mut self,
            name: &str,
            super_name: &str,
            methods: Vec<TestMethod>,
        ) -> Vec<u8> {
            let this_index = self.class(name);
            let super_index = self.class(super_name);
            let code_index = self.utf8("Code");
            let bootstrap_attr_index = self.utf8("BootstrapMethods");
            let method_indices: Vec<(u16, u16)> = methods
                .iter()
                .map(|method| (self.utf8(&method.name), self.utf8(&method.descriptor)))
                .collect();

            let mut out = Vec::new();
            out.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&52u16.to_be_bytes());
            out.extend_from_slice(&(self.pool.len() as u16 + 1).to_be_bytes());
            for entry in &self.pool {
                out.extend_from_slice(entry);
            }
            out.extend_from_slice(&0x0021u16.to_be_bytes());
            out.extend_from_slice(&this_index.to_be_bytes());
            out.extend_from_slice(&super_index.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());

            out.extend_from_slice(&(methods.len() as u16).to_be_bytes());
            for (method, (name_index, descriptor_index)) in methods.iter().zip(method_indices) {
                out.extend_from_slice(&method.access.to_be_bytes());
                out.extend_from_slice(&name_index.to_be_bytes());
                out.extend_from_slice(&descriptor_index.to_be_bytes());
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&code_index.to_be_bytes());
                let length = 2 + 2 + 4 + method.code.len() + 2 + 2;
                out.extend_from_slice(&(length as u32).to_be_bytes());
                out.extend_from_slice(&4u16.to_be_bytes());
                out.extend_from_slice(&4u16.to_be_bytes());
                out.extend_from_slice(&(method.code.len() as u32).to_be_bytes());
                out.extend_from_slice(&method.code);
                out.extend_from_slice(&0u16.to_be_bytes());
                out.extend_from_slice(&0u16.to_be_bytes());
            }

            if self.bootstrap_methods.is_empty() {
                out.extend_from_slice(&0u16.to_be_bytes());
            } else {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&bootstrap_attr_index.to_be_bytes());
                let length: usize = 2 + self
                    .bootstrap_methods
                    .iter()
                    .map(|(_, arguments)| 4 + 2 * arguments.len())
                    .sum::<usize>();
                out.extend_from_slice(&(length as u32).to_be_bytes());
                out.extend_from_slice(&(self.bootstrap_methods.len() as u16).to_be_bytes());
                for (method_ref, arguments) in &self.bootstrap_methods {
                    out.extend_from_slice(&method_ref.to_be_bytes());
                    out.extend_from_slice(&(arguments.len() as u16).to_be_bytes());
                    for argument in arguments {
                        out.extend_from_slice(&argument.to_be_bytes());
                    }
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::writer::{ClassWriter, TestMethod};
    use super::*;

    const METAFACTORY_DESC: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

    #[test]
    fn parse_class_decodes_invocations_past_switches() {
        let mut writer = ClassWriter::default();
        let static_ref = writer.method_ref("com/example/Lib", "n", "()V", false);
        let [hi, lo] = static_ref.to_be_bytes();
        // iconst_0; lookupswitch (2 padding bytes, default, npairs = 0); invokestatic; return
        let mut code = vec![0x03, opcodes::LOOKUPSWITCH, 0, 0];
        code.extend_from_slice(&11i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&[opcodes::INVOKESTATIC, hi, lo, opcodes::RETURN]);
        let bytes = writer.finish(
            "com/example/App",
            "java/lang/Object",
            vec![TestMethod {
                access: 0x0009,
                name: "m".to_string(),
                descriptor: "()V".to_string(),
                code,
            }],
        );

        let class = parse_class(&bytes).expect("parse class");

        assert_eq!(class.name, "com/example/App");
        assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
        let method = class.method("m", "()V").expect("method m");
        assert!(method.access.is_static);
        assert_eq!(method.instructions.len(), 1);
        assert_eq!(method.instructions[0].offset, 12);
        let InstructionKind::Invoke(site) = &method.instructions[0].kind else {
            panic!("expected invoke instruction");
        };
        assert_eq!(site.owner, "com/example/Lib");
        assert_eq!(site.name, "n");
        assert_eq!(site.kind, CallKind::Static);
        assert!(!site.is_interface);
    }

    #[test]
    fn parse_class_resolves_lambda_bootstrap_arguments() {
        let mut writer = ClassWriter::default();
        let metafactory = writer.method_handle(
            opcodes::H_INVOKESTATIC,
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            METAFACTORY_DESC,
        );
        let sam = writer.method_type("()V");
        let implementation = writer.method_handle(
            opcodes::H_INVOKESTATIC,
            "com/example/App",
            "lambda$f$0",
            "()V",
        );
        let instantiated = writer.method_type("()V");
        let indy = writer.invoke_dynamic(
            metafactory,
            vec![sam, implementation, instantiated],
            "run",
            "()Ljava/lang/Runnable;",
        );
        let [hi, lo] = indy.to_be_bytes();
        let bytes = writer.finish(
            "com/example/App",
            "java/lang/Object",
            vec![
                TestMethod {
                    access: 0x0001,
                    name: "f".to_string(),
                    descriptor: "()V".to_string(),
                    code: vec![opcodes::INVOKEDYNAMIC, hi, lo, 0, 0, 0x57, opcodes::RETURN],
                },
                TestMethod {
                    access: 0x100a,
                    name: "lambda$f$0".to_string(),
                    descriptor: "()V".to_string(),
                    code: vec![opcodes::RETURN],
                },
            ],
        );

        let class = parse_class(&bytes).expect("parse class");

        let method = class.method("f", "()V").expect("method f");
        let InstructionKind::InvokeDynamic(site) = &method.instructions[0].kind else {
            panic!("expected invokedynamic instruction");
        };
        assert_eq!(site.name, "run");
        assert_eq!(site.bootstrap.owner, "java/lang/invoke/LambdaMetafactory");
        assert_eq!(site.bootstrap.descriptor, METAFACTORY_DESC);
        assert_eq!(site.arguments.len(), 3);
        assert_eq!(
            site.arguments[1],
            BootstrapArgument::MethodHandle(MethodHandle {
                kind: opcodes::H_INVOKESTATIC,
                owner: "com/example/App".to_string(),
                name: "lambda$f$0".to_string(),
                descriptor: "()V".to_string(),
                is_interface: false,
            })
        );
        let lambda = class.method("lambda$f$0", "()V").expect("lambda body");
        assert!(lambda.access.is_private);
    }

    #[test]
    fn parse_class_rejects_invoke_of_field_ref() {
        let mut writer = ClassWriter::default();
        let field = writer.field_ref("com/example/Lib", "count", "I");
        let [hi, lo] = field.to_be_bytes();
        let bytes = writer.finish(
            "com/example/App",
            "java/lang/Object",
            vec![TestMethod {
                access: 0x0009,
                name: "m".to_string(),
                descriptor: "()V".to_string(),
                code: vec![opcodes::INVOKESTATIC, hi, lo, opcodes::RETURN],
            }],
        );

        let err = parse_class(&bytes).expect_err("field ref is not invocable");

        assert!(format!("{err:#}").contains("field ref"));
    }

    #[test]
    fn parse_class_rejects_invalid_bytes() {
        assert!(parse_class(b"nope").is_err());
    }

    #[test]
    fn opcode_length_handles_wide_and_tableswitch() {
        assert_eq!(opcode_length(&[opcodes::WIDE, opcodes::IINC, 0, 1, 0, 1], 0).expect("wide"), 6);
        assert_eq!(opcode_length(&[opcodes::WIDE, 0x15, 0, 1], 0).expect("wide load"), 4);

        // tableswitch at offset 0: 3 padding bytes, default, low = 0, high = 1, two targets
        let mut code = vec![opcodes::TABLESWITCH, 0, 0, 0];
        for value in [0i32, 0, 1, 0, 0] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        assert_eq!(opcode_length(&code, 0).expect("tableswitch"), code.len());
    }
}
