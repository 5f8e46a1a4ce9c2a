//! Evaluation simplifier: rewrites a method body using the results of partial evaluation.
//!
//! # Architecture
//!
//! The simplifier works on one method at a time, after the
//! [`PartialEvaluator`](crate::evaluation::PartialEvaluator) has reached its fixpoint, in three
//! phases:
//!
//! 1. **Local simplification**: every traced instruction without side effects is considered
//!    on its own. An instruction pushing a known constant becomes a constant push, a load of
//!    a value that a lower variable slot already holds becomes a load of that slot, and a
//!    conditional branch or switch with a single feasible target becomes a `goto` (or
//!    disappears when that target is the next instruction). These rewrites are only
//!    recorded here.
//! 2. **Marking** ([`marking`]): starting from the instructions with side effects and the
//!    `this(...)`/`super(...)` call of a constructor, necessity is propagated backwards to
//!    value producers, to branches that jump over code that stays, and to the stores that a
//!    simple evaluation following every edge still considers the source of a variable a
//!    necessary instruction reads. Loops that would otherwise vanish are kept as explicit
//!    infinite loops.
//! 3. **Fix-up** ([`fixup`]): every instruction is kept, replaced by its local
//!    simplification, rewritten (stack manipulations) or deleted, with pops and placeholder
//!    pushes wherever the surrounding code still expects a stack word. Dead exception
//!    handlers are removed.
//!
//! All edits are staged in a [`CodeAttributeEditor`](crate::assembly::CodeAttributeEditor)
//! and applied at once; any error leaves the original code untouched.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use classopt::prelude::*;
//!
//! # fn example(pool: &mut ClassPool) -> classopt::Result<()> {
//! let config = OptimizerConfig::default();
//! let keep = KeepMarker::default();
//! let hierarchy = ClassHierarchy::from_pool(pool);
//! let checker = SideEffectChecker::new(&hierarchy, &config, &keep);
//! let simplifier = EvaluationSimplifier::new(&config.simplifier, &checker, &BasicInvocationUnit);
//!
//! let class = pool.get_mut("com/example/Main").unwrap();
//! let method = class.method("run", "()I").unwrap().clone();
//! let code = method.code.clone().unwrap();
//! let evaluation = PartialEvaluator::new(&BasicInvocationUnit).evaluate(
//!     &class.constant_pool,
//!     &class.name,
//!     &method,
//!     &code,
//! )?;
//! let name = class.name.clone();
//! if let Some((simplified, report)) =
//!     simplifier.simplify(&mut class.constant_pool, &name, &method, &code, &evaluation)?
//! {
//!     println!("{report}: {} -> {} bytes", code.len(), simplified.len());
//! }
//! # Ok(())
//! # }
//! ```

mod fixup;
mod marking;
mod stackmove;

use std::fmt;

use crate::{
    assembly::{opcodes::*, FlowType, Instruction, LocalAccess},
    classfile::{CodeAttribute, ConstantPool, ProgramMethod},
    evaluation::{Evaluation, InvocationUnit, Value, DEFAULT_MAX_VISITS},
    optimize::{SideEffectChecker, SimplifierOptions},
    utils::BitSet,
    Result,
};

use fixup::Fixup;
use marking::Marker;

/// The local rewrite chosen for one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Simplification {
    /// Push this particular value instead
    Constant(Value),
    /// Load this lower variable slot holding the same value instead
    Alias(u16),
    /// Branch unconditionally to this offset instead
    Goto(usize),
    /// Branch that always continues with the next instruction
    Drop,
    /// Backward branch kept as a jump to itself
    InfiniteLoop,
}

/// What the simplifier changed in one method body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplificationReport {
    /// Instructions replaced by a constant push
    pub constants_folded: usize,
    /// Loads replaced by a load of a lower variable slot
    pub loads_aliased: usize,
    /// Conditional branches and switches with a single remaining target
    pub branches_simplified: usize,
    /// Instructions removed
    pub instructions_deleted: usize,
    /// `pop`/`pop2` inserted for stack words nobody consumes
    pub pops_inserted: usize,
    /// Placeholder constants pushed for stack words whose producer was removed
    pub pushes_inserted: usize,
    /// Backward branches kept as infinite loops
    pub loops_preserved: usize,
}

impl SimplificationReport {
    /// Adds the counts of `other`.
    pub fn merge(&mut self, other: &SimplificationReport) {
        self.constants_folded += other.constants_folded;
        self.loads_aliased += other.loads_aliased;
        self.branches_simplified += other.branches_simplified;
        self.instructions_deleted += other.instructions_deleted;
        self.pops_inserted += other.pops_inserted;
        self.pushes_inserted += other.pushes_inserted;
        self.loops_preserved += other.loops_preserved;
    }

    /// Returns `true` if nothing was changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == SimplificationReport::default()
    }
}

impl fmt::Display for SimplificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} constants, {} aliased loads, {} branches, {} deleted, {} pops, {} pushes",
            self.constants_folded,
            self.loads_aliased,
            self.branches_simplified,
            self.instructions_deleted,
            self.pops_inserted,
            self.pushes_inserted
        )?;
        if self.loops_preserved > 0 {
            write!(f, ", {} infinite loops", self.loops_preserved)?;
        }
        Ok(())
    }
}

/// Simplifies method bodies based on their partial evaluation.
pub struct EvaluationSimplifier<'a> {
    options: &'a SimplifierOptions,
    checker: &'a SideEffectChecker<'a>,
    unit: &'a dyn InvocationUnit,
    max_visits: usize,
}

impl<'a> EvaluationSimplifier<'a> {
    /// Creates a simplifier.
    ///
    /// # Arguments
    ///
    /// * `options` - The rewrites to perform.
    /// * `checker` - Decides which instructions must stay for their side effects.
    /// * `unit` - The invocation unit of the simple evaluation that guards variable
    ///   initialization; it should be the one the evaluation was made with.
    #[must_use]
    pub fn new(
        options: &'a SimplifierOptions,
        checker: &'a SideEffectChecker<'a>,
        unit: &'a dyn InvocationUnit,
    ) -> Self {
        EvaluationSimplifier {
            options,
            checker,
            unit,
            max_visits: DEFAULT_MAX_VISITS,
        }
    }

    /// Sets the visit bound of the simple evaluation.
    #[must_use]
    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits;
        self
    }

    /// Simplifies `code`, the body of `method` in class `class_name`, given its
    /// `evaluation`.
    ///
    /// Constants that do not fit a short push are added to `pool`.
    ///
    /// # Returns
    ///
    /// The simplified body and what changed, or `None` if nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluation is inconsistent with the code, a stack
    /// manipulation can not be rewritten ([`crate::Error::UnsupportedStackMove`]) or the
    /// edited code is invalid. Constants may have been added to `pool` by then.
    pub fn simplify(
        &self,
        pool: &mut ConstantPool,
        class_name: &str,
        method: &ProgramMethod,
        code: &CodeAttribute,
        evaluation: &Evaluation,
    ) -> Result<Option<(CodeAttribute, SimplificationReport)>> {
        let side_effects = self.side_effects(pool, class_name, evaluation)?;
        let mut simplifications = self.local_simplifications(evaluation, &side_effects)?;

        let marks = Marker {
            pool,
            class_name,
            method,
            code,
            evaluation,
            unit: self.unit,
            max_visits: self.max_visits,
            side_effects: &side_effects,
        }
        .run(&mut simplifications)?;

        if self.options.dump_marks {
            for (offset, instruction) in evaluation.instructions() {
                let mark = if !marks.reachable.contains(offset) {
                    'x'
                } else if marks.necessary.contains(offset) {
                    '+'
                } else {
                    '-'
                };
                log::trace!(
                    "{offset:5} {mark} {instruction:<24} {:?}",
                    simplifications[offset]
                );
            }
        }

        let mut fixup = Fixup::new(evaluation, &marks, &simplifications);
        fixup.run(pool, code)?;
        let Fixup { editor, report, .. } = fixup;
        if !editor.is_modified() {
            return Ok(None);
        }
        let simplified = editor.apply(code, pool)?;
        if simplified == *code {
            return Ok(None);
        }
        log::debug!(
            "{}.{}{}: {} ({} -> {} bytes)",
            class_name,
            method.name,
            method.descriptor,
            report,
            code.len(),
            simplified.len()
        );
        Ok(Some((simplified, report)))
    }

    fn side_effects(
        &self,
        pool: &ConstantPool,
        class_name: &str,
        evaluation: &Evaluation,
    ) -> Result<BitSet> {
        let mut side_effects = BitSet::new(evaluation.code_length());
        for (offset, instruction) in evaluation.instructions() {
            if evaluation.is_traced(offset)
                && self
                    .checker
                    .has_side_effects(class_name, pool, evaluation, offset, instruction)?
            {
                side_effects.insert(offset);
            }
        }
        Ok(side_effects)
    }

    fn local_simplifications(
        &self,
        evaluation: &Evaluation,
        side_effects: &BitSet,
    ) -> Result<Vec<Option<Simplification>>> {
        let mut simplifications = vec![None; evaluation.code_length()];
        for (offset, instruction) in evaluation.instructions() {
            if evaluation.is_traced(offset) && !side_effects.contains(offset) {
                simplifications[offset] = self.simplify_instruction(evaluation, offset, instruction)?;
            }
        }
        Ok(simplifications)
    }

    fn simplify_instruction(
        &self,
        evaluation: &Evaluation,
        offset: usize,
        instruction: &Instruction,
    ) -> Result<Option<Simplification>> {
        match instruction.flow_type() {
            FlowType::ConditionalBranch | FlowType::Switch => {
                if !self.options.simplify_branches {
                    return Ok(None);
                }
                let next = evaluation.next_offset(offset);
                return Ok(evaluation.targets(offset).single_offset().map(|target| {
                    if target == next {
                        Simplification::Drop
                    } else {
                        Simplification::Goto(target)
                    }
                }));
            }
            FlowType::Sequential if !instruction.is_stack_manipulation() => {}
            _ => return Ok(None),
        }

        let Some(pushed) = evaluation.pushed_value(offset) else {
            return Ok(None);
        };
        if pushed.is_particular() && pushed.return_addresses().is_none() {
            let narrows = matches!(instruction.opcode, LDC | LDC_W | LDC2_W)
                && fixup::short_constant(pushed).is_some();
            if self.options.fold_constants && (!instruction.is_constant_push() || narrows) {
                return Ok(Some(Simplification::Constant(pushed.clone())));
            }
            return Ok(None);
        }

        if self.options.alias_loads && pushed.symbol().is_some() {
            if let Some((LocalAccess::Load, _, index)) = instruction.local_access() {
                let Some(vars) = evaluation.vars_before(offset) else {
                    return Ok(None);
                };
                return Ok(vars
                    .iter()
                    .take_while(|(slot, _)| *slot < index)
                    .find(|(_, slot)| slot.value.same_identity(pushed))
                    .map(|(slot, _)| Simplification::Alias(slot)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        classfile::{ClassHierarchy, ComputationalType},
        evaluation::BasicInvocationUnit,
        optimize::{KeepMarker, OptimizerConfig},
        test::{evaluate_static, static_method, TEST_CLASS},
    };

    fn simplify_with(
        config: &OptimizerConfig,
        code: &CodeAttribute,
        descriptor: &str,
    ) -> Option<(CodeAttribute, SimplificationReport)> {
        let mut pool = ConstantPool::new();
        let method = static_method(descriptor);
        let hierarchy = ClassHierarchy::default();
        let keep = KeepMarker::default();
        let checker = SideEffectChecker::new(&hierarchy, config, &keep);
        let evaluation = evaluate_static(&pool, descriptor, code);
        EvaluationSimplifier::new(&config.simplifier, &checker, &BasicInvocationUnit)
            .simplify(&mut pool, TEST_CLASS, &method, code, &evaluation)
            .unwrap()
    }

    fn simplify(code: &CodeAttribute, descriptor: &str) -> Option<(CodeAttribute, SimplificationReport)> {
        simplify_with(&OptimizerConfig::default(), code, descriptor)
    }

    #[test]
    fn test_folds_arithmetic_on_constants() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(0)
            .iconst(1)
            .op(IADD)
            .op(IRETURN)
            .finish(0, &pool)
            .unwrap();
        let (simplified, report) = simplify(&code, "()I").unwrap();
        assert_eq!(simplified.code, vec![ICONST_1, IRETURN]);
        assert_eq!(report.constants_folded, 1);
        assert_eq!(report.instructions_deleted, 2);
    }

    #[test]
    fn test_dead_store_and_load_of_constant() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(5)
            .store(ComputationalType::Int, 0)
            .load(ComputationalType::Int, 0)
            .op(IRETURN)
            .finish(1, &pool)
            .unwrap();
        let (simplified, _) = simplify(&code, "()I").unwrap();
        assert_eq!(simplified.code, vec![ICONST_5, IRETURN]);
    }

    #[test]
    fn test_unused_dup_copy_is_dropped() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Int, 0)
            .op(DUP)
            .op(POP)
            .op(IRETURN)
            .finish(1, &pool)
            .unwrap();
        let (simplified, report) = simplify(&code, "(I)I").unwrap();
        assert_eq!(simplified.code, vec![ILOAD_0, IRETURN]);
        assert_eq!(report.instructions_deleted, 2);
    }

    #[test]
    fn test_alias_load_of_copied_parameter() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Int, 0)
            .store(ComputationalType::Int, 1)
            .load(ComputationalType::Int, 1)
            .op(IRETURN)
            .finish(2, &pool)
            .unwrap();
        let (simplified, report) = simplify(&code, "(I)I").unwrap();
        assert_eq!(simplified.code, vec![ILOAD_0, IRETURN]);
        assert_eq!(report.loads_aliased, 1);
    }

    #[test]
    fn test_popped_result_of_necessary_division_is_stable() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(100)
            .load(ComputationalType::Int, 0)
            .op(IDIV)
            .op(POP)
            .iconst(1)
            .op(IRETURN)
            .finish(1, &pool)
            .unwrap();
        assert!(simplify(&code, "(I)I").is_none());

        let code = InstructionAssembler::new()
            .op(LCONST_1)
            .load(ComputationalType::Long, 0)
            .op(LDIV)
            .op(POP2)
            .iconst(0)
            .op(IRETURN)
            .finish(2, &pool)
            .unwrap();
        assert!(simplify(&code, "(J)I").is_none());
    }

    #[test]
    fn test_second_simplification_is_a_no_op() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(100)
            .load(ComputationalType::Int, 0)
            .op(IDIV)
            .op(POP)
            .iconst(2)
            .iconst(3)
            .op(IADD)
            .op(IRETURN)
            .finish(1, &pool)
            .unwrap();
        let (simplified, report) = simplify(&code, "(I)I").unwrap();
        assert_eq!(
            simplified.code,
            vec![BIPUSH, 100, ILOAD_0, IDIV, POP, ICONST_5, IRETURN]
        );
        assert_eq!(report.pops_inserted, 0);
        assert!(simplify(&simplified, "(I)I").is_none());
    }

    #[test]
    fn test_self_loop_is_kept_verbatim() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .label("loop")
            .branch(GOTO, "loop")
            .finish(0, &pool)
            .unwrap();
        assert!(simplify(&code, "()V").is_none());
    }

    #[test]
    fn test_empty_loop_becomes_self_loop() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(0)
            .store(ComputationalType::Int, 0)
            .label("head")
            .iinc(0, 1)
            .branch(GOTO, "head")
            .finish(1, &pool)
            .unwrap();
        let (simplified, report) = simplify(&code, "()V").unwrap();
        assert_eq!(simplified.code, vec![GOTO, 0, 0]);
        assert_eq!(report.loops_preserved, 1);
    }

    #[test]
    fn test_options_disable_rewrites() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(2)
            .iconst(3)
            .op(IMUL)
            .op(IRETURN)
            .finish(0, &pool)
            .unwrap();
        let mut config = OptimizerConfig::default();
        config.simplifier.fold_constants = false;
        assert!(simplify_with(&config, &code, "()I").is_none());

        let (simplified, _) = simplify(&code, "()I").unwrap();
        assert_eq!(simplified.code, vec![BIPUSH, 6, IRETURN]);
    }

    #[test]
    fn test_necessary_instructions_keep_their_producers() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Int, 0)
            .op(DUP)
            .load(ComputationalType::Int, 1)
            .op(IADD)
            .op(IMUL)
            .load(ComputationalType::Int, 1)
            .op(POP)
            .op(IRETURN)
            .finish(2, &pool)
            .unwrap();
        let method = static_method("(II)I");
        let evaluation = evaluate_static(&pool, "(II)I", &code);
        let config = OptimizerConfig::default();
        let hierarchy = ClassHierarchy::default();
        let keep = KeepMarker::default();
        let checker = SideEffectChecker::new(&hierarchy, &config, &keep);
        let simplifier =
            EvaluationSimplifier::new(&config.simplifier, &checker, &BasicInvocationUnit);

        let side_effects = simplifier
            .side_effects(&pool, TEST_CLASS, &evaluation)
            .unwrap();
        let mut simplifications = simplifier
            .local_simplifications(&evaluation, &side_effects)
            .unwrap();
        let marks = Marker {
            pool: &pool,
            class_name: TEST_CLASS,
            method: &method,
            code: &code,
            evaluation: &evaluation,
            unit: &BasicInvocationUnit,
            max_visits: DEFAULT_MAX_VISITS,
            side_effects: &side_effects,
        }
        .run(&mut simplifications)
        .unwrap();

        for offset in marks.necessary.iter() {
            let instruction = evaluation.instruction(offset).unwrap();
            if simplifications[offset].is_some() || instruction.is_stack_manipulation() {
                continue;
            }
            let stack = evaluation.stack_before(offset).unwrap();
            let pops = instruction.stack_effect(&pool).unwrap().pops;
            for word in &stack.words()[stack.size() - pops..] {
                for producer in word.producers.instructions() {
                    let copies = evaluation.instruction(producer).unwrap().is_dup_or_swap();
                    assert!(
                        copies || marks.necessary.contains(producer),
                        "{producer} feeds necessary {offset} but is not necessary"
                    );
                }
            }
        }
        // the value copied by the dup
        assert!(marks.necessary.contains(0));
        // the dead load and its pop
        assert!(!marks.necessary.contains(5));
        assert!(!marks.necessary.contains(6));
    }

    #[test]
    fn test_report_display() {
        let report = SimplificationReport {
            constants_folded: 1,
            instructions_deleted: 2,
            ..SimplificationReport::default()
        };
        assert_eq!(
            report.to_string(),
            "1 constants, 0 aliased loads, 0 branches, 2 deleted, 0 pops, 0 pushes"
        );
        let mut total = report;
        total.merge(&SimplificationReport {
            loops_preserved: 1,
            ..SimplificationReport::default()
        });
        assert!(total.to_string().ends_with(", 1 infinite loops"));
        assert!(!total.is_empty());
    }
}
