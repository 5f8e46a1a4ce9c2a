use rustc_hash::FxHashSet;

use crate::{
    assembly::{opcodes::*, CodeAttributeEditor, Instruction, Operand},
    classfile::{
        retarget_descriptor, ClassAccessFlags, ClassHierarchy, ClassPool, Constant,
        ConstantPool, MethodAccessFlags, ProgramClass, ProgramMethod,
    },
    optimize::{finalizers::ClassPass, KeepMarker},
    Result,
};

const REF_INVOKE_VIRTUAL: u8 = 5;
const REF_INVOKE_INTERFACE: u8 = 9;

/// Replaces interfaces that have a single implementation by that implementation.
///
/// An interface qualifies when it is a program interface that is not kept, has no
/// superinterfaces, fields, static or default methods, appears in no kept member's
/// descriptor nor any `invokedynamic` call site, and is implemented by exactly one concrete program class
/// without subclasses. Every class constant, descriptor and interface method reference
/// naming it is then retargeted to the implementation, `invokeinterface` becomes
/// `invokevirtual`, and the interface is removed from the pool.
#[derive(Debug, Default)]
pub struct SingleImplementationInliner;

impl SingleImplementationInliner {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        SingleImplementationInliner
    }

    /// `(interface, implementation)` pairs that can be merged.
    fn candidates(
        pool: &ClassPool,
        hierarchy: &ClassHierarchy,
        keep: &KeepMarker,
    ) -> Vec<(String, String)> {
        let mut candidates = Vec::new();
        for interface in pool.program_classes() {
            if !interface.is_interface()
                || keep.is_class_kept(&interface.name)
                || !interface.interfaces.is_empty()
                || !interface.fields.is_empty()
                || interface
                    .methods
                    .iter()
                    .any(|m| !m.access.contains(MethodAccessFlags::ABSTRACT))
            {
                continue;
            }
            let [implementation] = hierarchy.direct_implementors(&interface.name) else {
                continue;
            };
            let concrete = hierarchy.class(implementation).is_some_and(|info| {
                !info.is_library
                    && !info.is_interface()
                    && !info.access.contains(ClassAccessFlags::ABSTRACT)
            });
            if !concrete || !hierarchy.direct_subclasses(implementation).is_empty() {
                continue;
            }
            if Self::is_call_site_type(pool, &interface.name)
                || Self::is_kept_signature_type(pool, keep, &interface.name)
                || Self::would_clash(pool, &interface.name, implementation)
            {
                log::debug!(
                    "not merging {} into {}: conflicting uses",
                    interface.name,
                    implementation
                );
                continue;
            }
            candidates.push((interface.name.clone(), implementation.clone()));
        }
        candidates
    }

    /// Returns `true` if some `invokedynamic` call site mentions `interface`, which may
    /// produce implementations at run time.
    fn is_call_site_type(pool: &ClassPool, interface: &str) -> bool {
        let needle = format!("L{interface};");
        pool.program_classes().any(|class| {
            class.constant_pool.iter().any(|(index, constant)| {
                matches!(constant, Constant::InvokeDynamic { .. })
                    && class
                        .constant_pool
                        .invoke_dynamic_descriptor(index)
                        .is_ok_and(|descriptor| descriptor.contains(&needle))
            })
        })
    }

    /// Returns `true` if the descriptor of a kept member mentions `interface`.
    fn is_kept_signature_type(pool: &ClassPool, keep: &KeepMarker, interface: &str) -> bool {
        let needle = format!("L{interface};");
        pool.program_classes().any(|class| {
            class.methods.iter().any(|m| {
                m.descriptor.contains(&needle)
                    && keep.is_member_kept(&class.name, &m.name, &m.descriptor)
            }) || class.fields.iter().any(|f| {
                f.descriptor.contains(&needle)
                    && keep.is_member_kept(&class.name, &f.name, &f.descriptor)
            })
        })
    }

    /// Returns `true` if retargeting would give two members of one class the same name
    /// and descriptor.
    fn would_clash(pool: &ClassPool, interface: &str, implementation: &str) -> bool {
        pool.program_classes().any(|class| {
            let mut methods = FxHashSet::default();
            let mut fields = FxHashSet::default();
            let retarget = |descriptor: &str| {
                retarget_descriptor(descriptor, interface, implementation)
                    .unwrap_or_else(|| descriptor.to_string())
            };
            !class
                .methods
                .iter()
                .all(|m| methods.insert((m.name.as_str(), retarget(&m.descriptor))))
                || !class
                    .fields
                    .iter()
                    .all(|f| fields.insert((f.name.as_str(), retarget(&f.descriptor))))
        })
    }

    fn retarget_name(name: &str, from: &str, to: &str) -> Option<String> {
        if name == from {
            Some(to.to_string())
        } else if name.starts_with('[') {
            retarget_descriptor(name, from, to)
        } else {
            None
        }
    }

    /// Rewrites the constant pool of one class. Returns the indices of the former
    /// interface method references.
    fn retarget_constants(
        constants: &mut ConstantPool,
        interface: &str,
        implementation: &str,
    ) -> Result<FxHashSet<u16>> {
        let snapshot: Vec<(u16, Constant)> =
            constants.iter().map(|(i, c)| (i, c.clone())).collect();

        let mut interface_refs = FxHashSet::default();
        for (index, constant) in &snapshot {
            if let Constant::InterfaceMethodref { class_index, .. } = constant {
                if constants.class_name(*class_index)? == interface {
                    interface_refs.insert(*index);
                }
            }
        }

        for (index, constant) in snapshot {
            let replacement = match constant {
                Constant::Class { name_index } => {
                    let name = constants.utf8(name_index)?;
                    match Self::retarget_name(name, interface, implementation) {
                        Some(name) => Some(Constant::Class {
                            name_index: constants.utf8_index(&name)?,
                        }),
                        None => None,
                    }
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    let descriptor = constants.utf8(descriptor_index)?;
                    match retarget_descriptor(descriptor, interface, implementation) {
                        Some(descriptor) => Some(Constant::NameAndType {
                            name_index,
                            descriptor_index: constants.utf8_index(&descriptor)?,
                        }),
                        None => None,
                    }
                }
                Constant::MethodType { descriptor_index } => {
                    let descriptor = constants.utf8(descriptor_index)?;
                    match retarget_descriptor(descriptor, interface, implementation) {
                        Some(descriptor) => Some(Constant::MethodType {
                            descriptor_index: constants.utf8_index(&descriptor)?,
                        }),
                        None => None,
                    }
                }
                Constant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } if interface_refs.contains(&index) => Some(Constant::Methodref {
                    class_index,
                    name_and_type_index,
                }),
                Constant::MethodHandle {
                    reference_kind: REF_INVOKE_INTERFACE,
                    reference_index,
                } if interface_refs.contains(&reference_index) => Some(Constant::MethodHandle {
                    reference_kind: REF_INVOKE_VIRTUAL,
                    reference_index,
                }),
                _ => None,
            };
            if let Some(replacement) = replacement {
                *constants.get_mut(index)? = replacement;
            }
        }
        Ok(interface_refs)
    }

    fn retarget_method(
        constants: &mut ConstantPool,
        method: &mut ProgramMethod,
        interface: &str,
        implementation: &str,
        interface_refs: &FxHashSet<u16>,
    ) -> Result<()> {
        if let Some(descriptor) = retarget_descriptor(&method.descriptor, interface, implementation)
        {
            method.descriptor = descriptor;
        }
        let Some(code) = &mut method.code else {
            return Ok(());
        };

        for variable in &mut code.local_variables {
            let descriptor = constants.utf8(variable.descriptor_index)?;
            if let Some(descriptor) = retarget_descriptor(descriptor, interface, implementation) {
                variable.descriptor_index = constants.utf8_index(&descriptor)?;
            }
        }

        let mut editor = CodeAttributeEditor::new(code.len());
        for (offset, instruction) in code.instructions()? {
            if let Operand::InvokeInterface { index, .. } = instruction.operand {
                if interface_refs.contains(&index) {
                    editor.replace(
                        offset,
                        vec![Instruction::new(INVOKEVIRTUAL, Operand::Constant(index))],
                    );
                }
            }
        }
        if editor.is_modified() {
            *code = editor.apply(code, constants)?;
        }
        Ok(())
    }

    fn retarget_class(class: &mut ProgramClass, interface: &str, implementation: &str) -> Result<()> {
        let ProgramClass {
            constant_pool,
            fields,
            methods,
            interfaces,
            ..
        } = class;
        interfaces.retain(|name| name != interface);
        let interface_refs = Self::retarget_constants(constant_pool, interface, implementation)?;
        for field in fields.iter_mut() {
            if let Some(descriptor) = retarget_descriptor(&field.descriptor, interface, implementation)
            {
                field.descriptor = descriptor;
            }
        }
        for method in methods.iter_mut() {
            Self::retarget_method(
                constant_pool,
                method,
                interface,
                implementation,
                &interface_refs,
            )?;
        }
        Ok(())
    }
}

impl ClassPass for SingleImplementationInliner {
    fn name(&self) -> &'static str {
        "single-implementation-inliner"
    }

    fn description(&self) -> &'static str {
        "Replaces interfaces that have one implementation by that implementation"
    }

    fn run(
        &self,
        pool: &mut ClassPool,
        hierarchy: &ClassHierarchy,
        keep: &KeepMarker,
    ) -> Result<usize> {
        let candidates = Self::candidates(pool, hierarchy, keep);
        for (interface, implementation) in &candidates {
            log::debug!("merging interface {interface} into {implementation}");
            for class in pool.iter_mut() {
                if !class.is_library && class.name != *interface {
                    Self::retarget_class(class, interface, implementation)?;
                }
            }
            pool.remove(interface);
        }
        Ok(candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        classfile::{ComputationalType, MemberKind, MemberRef, ProgramField},
        test::{object_pool, program_class},
    };

    fn pool_with_interface() -> ClassPool {
        let mut pool = object_pool();

        let mut shape = ProgramClass::new(
            "a/Shape",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        );
        shape.methods.push(ProgramMethod::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            "area",
            "()I",
            None,
        ));
        pool.add(shape);

        let mut square = program_class("a/Square", "java/lang/Object");
        square.interfaces.push("a/Shape".to_string());
        square
            .methods
            .push(ProgramMethod::new(MethodAccessFlags::PUBLIC, "area", "()I", None));
        pool.add(square);

        let mut client = program_class("a/Client", "java/lang/Object");
        let area = client
            .constant_pool
            .member_ref_index(&MemberRef {
                class: "a/Shape".to_string(),
                name: "area".to_string(),
                descriptor: "()I".to_string(),
                kind: MemberKind::InterfaceMethod,
            })
            .unwrap();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Reference, 0)
            .constant(INVOKEINTERFACE, area)
            .op(IRETURN)
            .finish(1, &client.constant_pool)
            .unwrap();
        client.methods.push(ProgramMethod::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "measure",
            "(La/Shape;)I",
            Some(code),
        ));
        client.fields.push(ProgramField::new(
            crate::classfile::FieldAccessFlags::PRIVATE,
            "shapes",
            "[La/Shape;",
        ));
        pool.add(client);
        pool
    }

    #[test]
    fn test_interface_is_replaced_by_its_implementation() {
        let mut pool = pool_with_interface();
        let hierarchy = ClassHierarchy::from_pool(&pool);

        let merged = SingleImplementationInliner::new()
            .run(&mut pool, &hierarchy, &KeepMarker::new())
            .unwrap();

        assert_eq!(merged, 1);
        assert!(pool.get("a/Shape").is_none());
        assert!(pool.get("a/Square").unwrap().interfaces.is_empty());

        let client = pool.get("a/Client").unwrap();
        assert!(client.method("measure", "(La/Square;)I").is_some());
        assert!(client.field("shapes", "[La/Square;").is_some());

        let code = client
            .method("measure", "(La/Square;)I")
            .unwrap()
            .code
            .as_ref()
            .unwrap();
        let instructions = code.instructions().unwrap();
        let (_, call) = &instructions[1];
        assert_eq!(call.opcode, INVOKEVIRTUAL);
        let target = client
            .constant_pool
            .member_ref(call.constant_index().unwrap())
            .unwrap();
        assert_eq!(target.class, "a/Square");
        assert_eq!(target.kind, MemberKind::Method);
        assert_eq!(code.code.len(), 5);
    }

    #[test]
    fn test_kept_or_shared_interfaces_stay() {
        let mut pool = pool_with_interface();
        let hierarchy = ClassHierarchy::from_pool(&pool);
        let mut keep = KeepMarker::new();
        keep.keep_class("a/Shape");
        let merged = SingleImplementationInliner::new()
            .run(&mut pool, &hierarchy, &keep)
            .unwrap();
        assert_eq!(merged, 0);

        let mut keep = KeepMarker::new();
        keep.keep_member("a/Client", "measure", "(La/Shape;)I");
        let merged = SingleImplementationInliner::new()
            .run(&mut pool, &hierarchy, &keep)
            .unwrap();
        assert_eq!(merged, 0);

        let mut circle = program_class("a/Circle", "java/lang/Object");
        circle.interfaces.push("a/Shape".to_string());
        pool.add(circle);
        let hierarchy = ClassHierarchy::from_pool(&pool);
        let merged = SingleImplementationInliner::new()
            .run(&mut pool, &hierarchy, &KeepMarker::new())
            .unwrap();
        assert_eq!(merged, 0);
        assert!(pool.get("a/Shape").is_some());
    }
}
