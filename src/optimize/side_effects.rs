//! Classification of instructions with effects beyond the operand stack and variables.

use crate::{
    assembly::{opcodes::*, Instruction, LocalAccess},
    classfile::{ClassHierarchy, ConstantPool, MemberRef},
    evaluation::{Evaluation, Value},
    optimize::{KeepMarker, OptimizerConfig},
    Result,
};

/// Decides which instructions must be kept regardless of whether their results are used.
///
/// Always side effects: field and array writes, monitors, returns, `athrow`, subroutine
/// plumbing, `invokedynamic` and invocations that are not declared side-effect free.
/// Reading a static field, invoking a static method and allocating an object count as well
/// when they may run a static initializer that has not run yet.
///
/// In conservative mode, instructions that may throw are side effects too, unless the
/// evaluation proves that they cannot.
pub struct SideEffectChecker<'a> {
    hierarchy: &'a ClassHierarchy,
    config: &'a OptimizerConfig,
    keep: &'a KeepMarker,
}

impl<'a> SideEffectChecker<'a> {
    /// Creates a checker.
    #[must_use]
    pub fn new(
        hierarchy: &'a ClassHierarchy,
        config: &'a OptimizerConfig,
        keep: &'a KeepMarker,
    ) -> Self {
        SideEffectChecker {
            hierarchy,
            config,
            keep,
        }
    }

    /// Returns `true` if the instruction at `offset` of a method of `class_name` has side
    /// effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction references an invalid constant.
    pub fn has_side_effects(
        &self,
        class_name: &str,
        pool: &ConstantPool,
        evaluation: &Evaluation,
        offset: usize,
        instruction: &Instruction,
    ) -> Result<bool> {
        let stack = evaluation.stack_before(offset);
        let top = |depth: usize| stack.and_then(|s| s.peek(depth)).map(|s| &s.value);

        if let Some((LocalAccess::Store, _, _)) = instruction.local_access() {
            return Ok(top(0).is_some_and(|v| v.return_addresses().is_some()));
        }

        Ok(match instruction.opcode {
            IASTORE..=SASTORE | PUTFIELD | PUTSTATIC | MONITORENTER | MONITOREXIT => true,
            IRETURN..=RETURN | ATHROW | JSR | JSR_W | RET | INVOKEDYNAMIC => true,
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                let method = self.member(pool, instruction)?;
                if !self.config.is_side_effect_free(&method)
                    || self
                        .keep
                        .is_member_kept(&method.class, &method.name, &method.descriptor)
                {
                    true
                } else {
                    instruction.opcode == INVOKESTATIC
                        && self.triggers_initializer(class_name, &method.class)
                }
            }
            GETSTATIC => {
                let field = self.member(pool, instruction)?;
                let declaring = self
                    .hierarchy
                    .resolve(&field)
                    .map_or(field.class, |resolved| resolved.class);
                self.triggers_initializer(class_name, &declaring)
            }
            NEW => {
                let index = instruction
                    .constant_index()
                    .ok_or_else(|| malformed_error!("new without class operand"))?;
                self.triggers_initializer(class_name, pool.class_name(index)?)
            }
            IDIV | IREM if self.config.conservative => {
                !top(0).and_then(Value::as_int).is_some_and(|d| d != 0)
            }
            LDIV | LREM if self.config.conservative => {
                !top(0).and_then(Value::as_long).is_some_and(|d| d != 0)
            }
            IALOAD..=SALOAD | ARRAYLENGTH | MULTIANEWARRAY if self.config.conservative => true,
            GETFIELD if self.config.conservative => !top(0).is_some_and(|v| v.is_not_null()),
            CHECKCAST if self.config.conservative => !top(0).is_some_and(|v| v.is_null()),
            NEWARRAY | ANEWARRAY if self.config.conservative => {
                !top(0).and_then(Value::as_int).is_some_and(|n| n >= 0)
            }
            _ => false,
        })
    }

    fn member(
        &self,
        pool: &ConstantPool,
        instruction: &Instruction,
    ) -> Result<MemberRef> {
        let index = instruction.constant_index().ok_or_else(|| {
            malformed_error!("{} without constant operand", instruction.mnemonic())
        })?;
        pool.member_ref(index)
    }

    fn triggers_initializer(&self, from: &str, target: &str) -> bool {
        !target.starts_with('[') && self.hierarchy.may_trigger_initializer(from, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{InstructionAssembler, Operand},
        classfile::{
            ClassAccessFlags, CodeAttribute, ComputationalType, MemberKind, MethodAccessFlags,
            ProgramClass, ProgramMethod,
        },
        test::{evaluate_static, object_pool, program_class},
    };

    fn evaluate(pool: &ConstantPool, code: &CodeAttribute) -> Evaluation {
        evaluate_static(pool, "(I)I", code)
    }

    #[test]
    fn test_division_needs_a_proven_divisor_in_conservative_mode() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Int, 0)
            .iconst(3)
            .op(IDIV)
            .load(ComputationalType::Int, 0)
            .op(IDIV)
            .op(IRETURN)
            .finish(1, &pool)
            .unwrap();
        let evaluation = evaluate(&pool, &code);
        let hierarchy = ClassHierarchy::default();
        let keep = KeepMarker::default();

        let conservative = OptimizerConfig::default();
        let checker = SideEffectChecker::new(&hierarchy, &conservative, &keep);
        let idiv = Instruction::simple(IDIV);
        assert!(!checker
            .has_side_effects("a/A", &pool, &evaluation, 2, &idiv)
            .unwrap());
        assert!(checker
            .has_side_effects("a/A", &pool, &evaluation, 4, &idiv)
            .unwrap());

        let relaxed = OptimizerConfig {
            conservative: false,
            ..OptimizerConfig::default()
        };
        let checker = SideEffectChecker::new(&hierarchy, &relaxed, &keep);
        assert!(!checker
            .has_side_effects("a/A", &pool, &evaluation, 4, &idiv)
            .unwrap());
    }

    #[test]
    fn test_invocations_and_initializers() {
        let mut classes = object_pool();
        let mut util = program_class("a/Util", "java/lang/Object");
        util.methods.push(ProgramMethod::new(
            MethodAccessFlags::STATIC,
            "<clinit>",
            "()V",
            None,
        ));
        classes.add(util);
        classes.add(ProgramClass::new(
            "a/Plain",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
        ));
        let hierarchy = ClassHierarchy::from_pool(&classes);

        let mut pool = ConstantPool::new();
        let square = |class: &str| MemberRef {
            class: class.to_string(),
            name: "square".to_string(),
            descriptor: "(I)I".to_string(),
            kind: MemberKind::Method,
        };
        let util_square = pool.member_ref_index(&square("a/Util")).unwrap();
        let plain_square = pool.member_ref_index(&square("a/Plain")).unwrap();
        let code = CodeAttribute::default();
        let evaluation = evaluate(&pool, &code);

        let config = OptimizerConfig::default()
            .assume_no_side_effects("a/Util", "square", "(I)I")
            .assume_no_side_effects("a/Plain", "square", "(I)I");
        let keep = KeepMarker::default();
        let checker = SideEffectChecker::new(&hierarchy, &config, &keep);
        let call = |index| Instruction::new(INVOKESTATIC, Operand::Constant(index));

        assert!(checker
            .has_side_effects("a/A", &pool, &evaluation, 0, &call(util_square))
            .unwrap());
        assert!(!checker
            .has_side_effects("a/Util", &pool, &evaluation, 0, &call(util_square))
            .unwrap());
        assert!(!checker
            .has_side_effects("a/A", &pool, &evaluation, 0, &call(plain_square))
            .unwrap());

        let mut keep = KeepMarker::default();
        keep.keep_member("a/Plain", "square", "(I)I");
        let checker = SideEffectChecker::new(&hierarchy, &config, &keep);
        assert!(checker
            .has_side_effects("a/A", &pool, &evaluation, 0, &call(plain_square))
            .unwrap());
    }
}
