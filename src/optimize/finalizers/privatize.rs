use rustc_hash::FxHashSet;

use crate::{
    assembly::{opcodes::*, CodeAttributeEditor, Instruction},
    classfile::{
        ClassAccessFlags, ClassHierarchy, ClassPool, Constant, ConstantPool, MethodAccessFlags,
        ProgramMethod,
    },
    optimize::{finalizers::ClassPass, KeepMarker},
    Result,
};

type MethodKey = (String, String, String);

/// Makes methods `private` when no other class references them.
///
/// A method qualifies when it is not kept, not an initializer, not abstract, not declared
/// in an interface, neither overrides nor is overridden, and every method reference that
/// resolves to it sits in the constant pool of its own class and names that class.
/// Method handles always count as foreign references. `invokevirtual` calls of a
/// privatized method become `invokespecial`.
#[derive(Debug, Default)]
pub struct MethodPrivatizer;

impl MethodPrivatizer {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        MethodPrivatizer
    }

    /// Methods referenced from outside their declaring class.
    fn foreign_references(pool: &ClassPool, hierarchy: &ClassHierarchy) -> FxHashSet<MethodKey> {
        let mut used = FxHashSet::default();
        for class in pool.program_classes() {
            let constants = &class.constant_pool;
            for (index, constant) in constants.iter() {
                let (reference, handle) = match constant {
                    Constant::Methodref { .. } | Constant::InterfaceMethodref { .. } => {
                        (index, false)
                    }
                    Constant::MethodHandle {
                        reference_index, ..
                    } => (*reference_index, true),
                    _ => continue,
                };
                let Ok(member) = constants.member_ref(reference) else {
                    continue;
                };
                let declaring = hierarchy
                    .resolve(&member)
                    .map_or_else(|| member.class.clone(), |resolved| resolved.class);
                if handle || member.class != class.name || declaring != class.name {
                    used.insert((declaring, member.name, member.descriptor));
                }
            }
        }
        used
    }

    fn is_candidate(
        class: &str,
        method: &ProgramMethod,
        hierarchy: &ClassHierarchy,
        keep: &KeepMarker,
        used: &FxHashSet<MethodKey>,
    ) -> bool {
        !method.name.starts_with('<')
            && !method
                .access
                .intersects(MethodAccessFlags::PRIVATE | MethodAccessFlags::ABSTRACT)
            && !keep.is_member_kept(class, &method.name, &method.descriptor)
            && !used.contains(&(
                class.to_string(),
                method.name.clone(),
                method.descriptor.clone(),
            ))
            && !hierarchy.overrides(class, &method.name, &method.descriptor)
            && !hierarchy.is_overridden(class, &method.name, &method.descriptor)
    }

    /// Turns `invokevirtual` calls of the privatized methods of `class` into
    /// `invokespecial`.
    fn rewrite_calls(
        class: &str,
        pool: &ConstantPool,
        method: &mut ProgramMethod,
        privatized: &FxHashSet<(String, String)>,
    ) -> Result<()> {
        let Some(code) = &method.code else {
            return Ok(());
        };
        let mut editor = CodeAttributeEditor::new(code.len());
        for (offset, instruction) in code.instructions()? {
            if instruction.opcode != INVOKEVIRTUAL {
                continue;
            }
            let Some(index) = instruction.constant_index() else {
                continue;
            };
            let target = pool.member_ref(index)?;
            if target.class == class && privatized.contains(&(target.name, target.descriptor)) {
                editor.replace(
                    offset,
                    vec![Instruction::new(INVOKESPECIAL, instruction.operand.clone())],
                );
            }
        }
        if editor.is_modified() {
            let rewritten = editor.apply(code, pool)?;
            method.code = Some(rewritten);
        }
        Ok(())
    }
}

impl ClassPass for MethodPrivatizer {
    fn name(&self) -> &'static str {
        "method-privatizer"
    }

    fn description(&self) -> &'static str {
        "Makes methods only used by their own class private"
    }

    fn run(
        &self,
        pool: &mut ClassPool,
        hierarchy: &ClassHierarchy,
        keep: &KeepMarker,
    ) -> Result<usize> {
        let used = Self::foreign_references(pool, hierarchy);
        let mut total = 0;

        for class in pool.iter_mut() {
            if class.is_library || class.access.contains(ClassAccessFlags::INTERFACE) {
                continue;
            }
            let mut privatized = FxHashSet::default();
            for method in &mut class.methods {
                if !Self::is_candidate(&class.name, method, hierarchy, keep, &used) {
                    continue;
                }
                log::trace!(
                    "making {}.{}{} private",
                    class.name,
                    method.name,
                    method.descriptor
                );
                method.access.remove(MethodAccessFlags::PUBLIC | MethodAccessFlags::PROTECTED);
                method.access.insert(MethodAccessFlags::PRIVATE);
                privatized.insert((method.name.clone(), method.descriptor.clone()));
            }
            if privatized.is_empty() {
                continue;
            }
            total += privatized.len();
            for method in &mut class.methods {
                Self::rewrite_calls(&class.name, &class.constant_pool, method, &privatized)?;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        classfile::{ComputationalType, MemberKind, MemberRef, ProgramClass},
        test::{object_pool, program_class},
    };

    fn method_ref(class: &str, name: &str) -> MemberRef {
        MemberRef {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: "()V".to_string(),
            kind: MemberKind::Method,
        }
    }

    fn calling(class: &mut ProgramClass, name: &str, target: &MemberRef) {
        let index = class.constant_pool.member_ref_index(target).unwrap();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Reference, 0)
            .constant(INVOKEVIRTUAL, index)
            .op(RETURN)
            .finish(1, &class.constant_pool)
            .unwrap();
        class
            .methods
            .push(ProgramMethod::new(MethodAccessFlags::PUBLIC, name, "()V", Some(code)));
    }

    #[test]
    fn test_methods_used_only_locally_become_private() {
        let mut pool = object_pool();

        let mut worker = program_class("a/Worker", "java/lang/Object");
        worker
            .methods
            .push(ProgramMethod::new(MethodAccessFlags::PUBLIC, "helper", "()V", None));
        worker
            .methods
            .push(ProgramMethod::new(MethodAccessFlags::PUBLIC, "shared", "()V", None));
        calling(&mut worker, "run", &method_ref("a/Worker", "helper"));
        pool.add(worker);

        let mut client = program_class("a/Client", "java/lang/Object");
        calling(&mut client, "go", &method_ref("a/Worker", "shared"));
        calling(&mut client, "start", &method_ref("a/Worker", "run"));
        pool.add(client);

        let hierarchy = ClassHierarchy::from_pool(&pool);
        let mut keep = KeepMarker::new();
        keep.keep_member("a/Client", "go", "()V")
            .keep_member("a/Client", "start", "()V");

        let privatized = MethodPrivatizer::new()
            .run(&mut pool, &hierarchy, &keep)
            .unwrap();

        assert_eq!(privatized, 1);
        let worker = pool.get("a/Worker").unwrap();
        let is_private = |name: &str| {
            worker
                .method(name, "()V")
                .unwrap()
                .access
                .contains(MethodAccessFlags::PRIVATE)
        };
        assert!(is_private("helper"));
        assert!(!is_private("shared"));
        assert!(!is_private("run"));

        let run = worker.method("run", "()V").unwrap().code.as_ref().unwrap();
        assert_eq!(run.code[1], INVOKESPECIAL);
        let go = pool.get("a/Client").unwrap().method("go", "()V").unwrap();
        assert_eq!(go.code.as_ref().unwrap().code[1], INVOKEVIRTUAL);
    }

    #[test]
    fn test_overridden_methods_stay_virtual() {
        let mut pool = object_pool();
        let mut base = program_class("a/Base", "java/lang/Object");
        base.methods
            .push(ProgramMethod::new(MethodAccessFlags::PUBLIC, "step", "()V", None));
        pool.add(base);
        let mut derived = program_class("a/Derived", "a/Base");
        derived
            .methods
            .push(ProgramMethod::new(MethodAccessFlags::PUBLIC, "step", "()V", None));
        pool.add(derived);

        let hierarchy = ClassHierarchy::from_pool(&pool);
        let privatized = MethodPrivatizer::new()
            .run(&mut pool, &hierarchy, &KeepMarker::new())
            .unwrap();
        assert_eq!(privatized, 0);
    }
}
