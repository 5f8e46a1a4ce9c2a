//! The partial evaluator: a worklist fixpoint over one method body.
//!
//! # Architecture
//!
//! The evaluator decodes the bytecode once, seeds offset 0 with the entry frame and then
//! repeatedly takes the lowest pending offset, runs the [`Processor`] on a copy of the state
//! recorded before it, and joins the resulting state into every successor. A successor is
//! re-queued only when its recorded state changed, so the loop ends once the state is stable.
//!
//! Exception handlers are entered from every traced instruction in their protected range
//! with the variables *before* that instruction and a stack holding only the caught exception.
//!
//! # Evaluation record
//!
//! The [`Evaluation`] keeps, per offset, everything the simplifier later asks about:
//! traced-ness, the variable frame and stack before and after, branch targets (including the
//! fall-through) and branch origins, plus the constructor call of every `new` and the
//! subroutines that return.
//!
//! # Value factories
//!
//! [`ValueFactory::Precise`] tracks constants and symbolic identities. [`ValueFactory::Simple`]
//! forgets them so that every feasible edge is followed, which is what the simplifier needs to
//! find variable producers independent of branch folding.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::{
    assembly::{decode_all, opcodes::NEW, Instruction},
    classfile::{CodeAttribute, ComputationalType, ConstantPool, ProgramMethod},
    evaluation::{
        processor::{Event, Processor},
        InvocationUnit, JoinSemiLattice, OffsetSet, Origin, OriginSet, ReferenceValue, Symbol,
        TracedStack, TracedVariables, Value,
    },
    utils::BitSet,
    Error, Result,
};

/// Default bound on how often a single offset may be evaluated.
pub const DEFAULT_MAX_VISITS: usize = 1_000;

/// How values are created during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFactory {
    /// Track particular constants and symbolic identities
    #[default]
    Precise,
    /// Every value is unknown, only return addresses stay precise
    Simple,
}

/// The result of evaluating one method body.
#[derive(Debug, Clone)]
pub struct Evaluation {
    instructions: Vec<Option<Instruction>>,
    lengths: Vec<usize>,
    traced: BitSet,
    vars_before: Vec<Option<TracedVariables>>,
    vars_after: Vec<Option<TracedVariables>>,
    stack_before: Vec<Option<TracedStack>>,
    stack_after: Vec<Option<TracedStack>>,
    targets: Vec<OffsetSet>,
    origins: Vec<OffsetSet>,
    initializations: FxHashMap<usize, usize>,
    super_initialization: Option<usize>,
    return_points: FxHashMap<usize, usize>,
    returning: BitSet,
}

impl Evaluation {
    fn new(code: &[u8]) -> Result<Self> {
        let length = code.len();
        let mut instructions = vec![None; length];
        let mut lengths = vec![0; length];
        for (offset, instruction) in decode_all(code)? {
            lengths[offset] = instruction.length(offset);
            instructions[offset] = Some(instruction);
        }
        Ok(Evaluation {
            instructions,
            lengths,
            traced: BitSet::new(length),
            vars_before: vec![None; length],
            vars_after: vec![None; length],
            stack_before: vec![None; length],
            stack_after: vec![None; length],
            targets: vec![OffsetSet::new(); length],
            origins: vec![OffsetSet::new(); length],
            initializations: FxHashMap::default(),
            super_initialization: None,
            return_points: FxHashMap::default(),
            returning: BitSet::new(length),
        })
    }

    /// Length of the evaluated bytecode.
    #[must_use]
    pub fn code_length(&self) -> usize {
        self.instructions.len()
    }

    /// The instruction starting at `offset`.
    #[must_use]
    pub fn instruction(&self, offset: usize) -> Option<&Instruction> {
        self.instructions.get(offset).and_then(Option::as_ref)
    }

    /// All decoded instructions in offset order, traced or not.
    pub fn instructions(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(offset, i)| i.as_ref().map(|i| (offset, i)))
    }

    /// Offset of the instruction following the one at `offset`.
    #[must_use]
    pub fn next_offset(&self, offset: usize) -> usize {
        offset + self.lengths.get(offset).copied().unwrap_or(1)
    }

    /// Returns `true` if the instruction at `offset` was reached.
    #[must_use]
    pub fn is_traced(&self, offset: usize) -> bool {
        self.traced.contains(offset)
    }

    /// The set of reached offsets.
    #[must_use]
    pub fn traced(&self) -> &BitSet {
        &self.traced
    }

    /// Number of reached instructions.
    #[must_use]
    pub fn traced_count(&self) -> usize {
        self.traced.count()
    }

    /// Variables before the instruction at `offset`.
    #[must_use]
    pub fn vars_before(&self, offset: usize) -> Option<&TracedVariables> {
        self.vars_before.get(offset).and_then(Option::as_ref)
    }

    /// Variables after the instruction at `offset`.
    #[must_use]
    pub fn vars_after(&self, offset: usize) -> Option<&TracedVariables> {
        self.vars_after.get(offset).and_then(Option::as_ref)
    }

    /// Operand stack before the instruction at `offset`.
    #[must_use]
    pub fn stack_before(&self, offset: usize) -> Option<&TracedStack> {
        self.stack_before.get(offset).and_then(Option::as_ref)
    }

    /// Operand stack after the instruction at `offset`.
    #[must_use]
    pub fn stack_after(&self, offset: usize) -> Option<&TracedStack> {
        self.stack_after.get(offset).and_then(Option::as_ref)
    }

    /// Offsets control may continue at after `offset`, fall-through included, handlers
    /// excluded.
    #[must_use]
    pub fn targets(&self, offset: usize) -> &OffsetSet {
        &self.targets[offset]
    }

    /// Offsets that may transfer control to `offset`.
    #[must_use]
    pub fn origins(&self, offset: usize) -> &OffsetSet {
        &self.origins[offset]
    }

    /// The `invokespecial <init>` initializing the object created by the `new` at `offset`.
    #[must_use]
    pub fn initialization_offset(&self, new_offset: usize) -> Option<usize> {
        self.initializations.get(&new_offset).copied()
    }

    /// The `this(...)` or `super(...)` call of a constructor.
    #[must_use]
    pub fn super_initialization_offset(&self) -> Option<usize> {
        self.super_initialization
    }

    /// Returns `true` if the subroutine entered at `entry` executes a `ret`.
    #[must_use]
    pub fn is_subroutine_returning(&self, entry: usize) -> bool {
        self.returning.contains(entry)
    }

    /// The value pushed by the instruction at `offset`, if it pushes one.
    #[must_use]
    pub fn pushed_value(&self, offset: usize) -> Option<&Value> {
        self.stack_after(offset)?
            .peek(0)
            .filter(|slot| slot.producers.contains(Origin::Instruction(offset as u32)))
            .map(|slot| &slot.value)
    }
}

/// Evaluates method bodies symbolically.
pub struct PartialEvaluator<'a> {
    unit: &'a dyn InvocationUnit,
    factory: ValueFactory,
    restriction: Option<&'a BitSet>,
    max_visits: usize,
}

impl<'a> PartialEvaluator<'a> {
    /// A precise evaluator consulting `unit`.
    #[must_use]
    pub fn new(unit: &'a dyn InvocationUnit) -> Self {
        PartialEvaluator {
            unit,
            factory: ValueFactory::Precise,
            restriction: None,
            max_visits: DEFAULT_MAX_VISITS,
        }
    }

    /// A simple evaluator, optionally only following edges into offsets of `restriction`.
    #[must_use]
    pub fn simple(unit: &'a dyn InvocationUnit, restriction: Option<&'a BitSet>) -> Self {
        PartialEvaluator {
            unit,
            factory: ValueFactory::Simple,
            restriction,
            max_visits: DEFAULT_MAX_VISITS,
        }
    }

    /// Sets the per-offset visit bound.
    #[must_use]
    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits;
        self
    }

    fn allowed(&self, offset: usize) -> bool {
        self.restriction.is_none_or(|r| r.contains(offset))
    }

    /// Evaluates `code`, the body of `method` in class `class_name`.
    ///
    /// # Errors
    ///
    /// Returns an error for undecodable or inconsistent bytecode (stack height mismatches at
    /// merge points, branches into the middle of an instruction) and
    /// [`Error::EvaluationLimit`] when an offset is evaluated more often than allowed.
    pub fn evaluate(
        &self,
        pool: &ConstantPool,
        class_name: &str,
        method: &ProgramMethod,
        code: &CodeAttribute,
    ) -> Result<Evaluation> {
        let mut evaluation = Evaluation::new(&code.code)?;
        if code.code.is_empty() || !self.allowed(0) {
            return Ok(evaluation);
        }

        let processor = Processor {
            pool,
            factory: self.factory,
            unit: self.unit,
        };
        let mut worklist = BTreeSet::new();
        let mut visits = vec![0usize; evaluation.code_length()];
        let entry = self.entry_variables(class_name, method, code)?;
        Self::merge(&mut evaluation, 0, entry, TracedStack::new(), &mut worklist)?;

        while let Some(offset) = worklist.pop_first() {
            visits[offset] += 1;
            if visits[offset] > self.max_visits {
                return Err(Error::EvaluationLimit {
                    offset,
                    limit: self.max_visits,
                });
            }
            let instruction = evaluation
                .instruction(offset)
                .cloned()
                .ok_or_else(|| malformed_error!("No instruction starts at {}", offset))?;
            let (Some(before_vars), Some(before_stack)) = (
                evaluation.vars_before(offset).cloned(),
                evaluation.stack_before(offset).cloned(),
            ) else {
                return Err(malformed_error!("No state recorded before {}", offset));
            };

            let mut vars = before_vars.clone();
            let mut stack = before_stack;
            let step = processor.execute(
                offset,
                &instruction,
                evaluation.lengths[offset],
                &mut vars,
                &mut stack,
            )?;
            log::trace!("{offset:5}: {instruction:<24} {vars} {stack}");
            evaluation.traced.insert(offset);

            match step.event {
                Some(Event::Initialization(Some(Symbol::Instruction(new_offset))))
                    if evaluation
                        .instruction(new_offset as usize)
                        .is_some_and(|i| i.opcode == NEW) =>
                {
                    evaluation
                        .initializations
                        .insert(new_offset as usize, offset);
                }
                Some(Event::Initialization(Some(Symbol::Parameter(0))))
                    if method.is_constructor() =>
                {
                    evaluation.super_initialization = Some(offset);
                }
                Some(Event::SubroutineCall {
                    target,
                    return_offset,
                }) => {
                    evaluation.return_points.insert(return_offset, target);
                }
                Some(Event::SubroutineReturn(ref addresses)) => {
                    for address in addresses.iter() {
                        if let Some(&entry) = evaluation.return_points.get(&address) {
                            evaluation.returning.insert(entry);
                        }
                    }
                }
                _ => {}
            }

            for (index, handler) in code.exception_table.iter().enumerate() {
                let handler_pc = handler.handler_pc as usize;
                if !handler.covers(offset as u32) || !self.allowed(handler_pc) {
                    continue;
                }
                if evaluation.instruction(handler_pc).is_none() {
                    return Err(Error::InvalidBranch {
                        origin: offset,
                        target: i64::from(handler.handler_pc),
                    });
                }
                log::trace!("{offset:5}: handler {index} at {handler_pc}");
                let symbol = Symbol::CaughtException(handler.handler_pc);
                let mut handler_vars = before_vars.clone();
                handler_vars.invalidate(symbol);
                let exception = match self.factory {
                    ValueFactory::Precise => Value::Reference(ReferenceValue::Specific {
                        symbol,
                        not_null: true,
                    }),
                    ValueFactory::Simple => {
                        Value::Reference(ReferenceValue::Unknown { not_null: true })
                    }
                };
                let mut handler_stack = TracedStack::new();
                handler_stack.push(
                    exception,
                    OriginSet::single(Origin::ExceptionHandler(handler.handler_pc)),
                );
                Self::merge(
                    &mut evaluation,
                    handler_pc,
                    handler_vars,
                    handler_stack,
                    &mut worklist,
                )?;
            }

            for successor in step.successors {
                if evaluation.instruction(successor).is_none() {
                    return Err(Error::InvalidBranch {
                        origin: offset,
                        target: successor as i64,
                    });
                }
                if !self.allowed(successor) {
                    continue;
                }
                evaluation.targets[offset].insert(successor);
                evaluation.origins[successor].insert(offset);
                Self::merge(
                    &mut evaluation,
                    successor,
                    vars.clone(),
                    stack.clone(),
                    &mut worklist,
                )?;
            }

            evaluation.vars_after[offset] = Some(vars);
            evaluation.stack_after[offset] = Some(stack);
        }

        log::debug!(
            "{}.{}{}: traced {} of {} instructions",
            class_name,
            method.name,
            method.descriptor,
            evaluation.traced_count(),
            evaluation.instructions().count()
        );
        Ok(evaluation)
    }

    /// Joins a state into the state before `offset`, queueing it if anything changed.
    fn merge(
        evaluation: &mut Evaluation,
        offset: usize,
        vars: TracedVariables,
        stack: TracedStack,
        worklist: &mut BTreeSet<usize>,
    ) -> Result<()> {
        let changed = match (
            &mut evaluation.vars_before[offset],
            &mut evaluation.stack_before[offset],
        ) {
            (Some(old_vars), Some(old_stack)) => {
                let joined = old_stack.try_join(&stack).map_err(|_| {
                    malformed_error!(
                        "Stack heights differ at {}: {} vs {}",
                        offset,
                        old_stack.size(),
                        stack.size()
                    )
                })?;
                let stack_changed = joined != *old_stack;
                *old_stack = joined;
                old_vars.join_with(&vars) || stack_changed
            }
            (vars_slot, stack_slot) => {
                *vars_slot = Some(vars);
                *stack_slot = Some(stack);
                true
            }
        };
        if changed {
            worklist.insert(offset);
        }
        Ok(())
    }

    /// The variable frame at method entry: `this`, then the parameters, then unset slots.
    fn entry_variables(
        &self,
        class_name: &str,
        method: &ProgramMethod,
        code: &CodeAttribute,
    ) -> Result<TracedVariables> {
        let descriptor = method.parsed_descriptor()?;
        let mut vars = TracedVariables::new(usize::from(code.max_locals));
        let entry = OriginSet::single(Origin::MethodEntry);
        let mut slot = 0u16;

        if !method.is_static() {
            let value = self
                .parameter_value(class_name, method, 0, ComputationalType::Reference)
                .unwrap_or_else(|| self.parameter(ComputationalType::Reference, 0, true));
            vars.store(0, value, entry.clone())?;
            slot = 1;
        }
        for parameter in &descriptor.parameters {
            let kind = parameter.computational_type();
            let value = self
                .parameter_value(class_name, method, slot, kind)
                .unwrap_or_else(|| self.parameter(kind, slot, false));
            vars.store(slot, value, entry.clone())?;
            slot += parameter.size() as u16;
        }
        Ok(vars)
    }

    fn parameter_value(
        &self,
        class_name: &str,
        method: &ProgramMethod,
        slot: u16,
        kind: ComputationalType,
    ) -> Option<Value> {
        self.unit
            .parameter_value(class_name, method, slot)
            .filter(|v| v.computational_type() == Some(kind))
            .map(|v| self.factory.constant(v))
    }

    fn parameter(&self, kind: ComputationalType, slot: u16, not_null: bool) -> Value {
        match self.factory {
            ValueFactory::Precise => Value::specific(kind, Symbol::Parameter(slot), not_null),
            ValueFactory::Simple => match kind {
                ComputationalType::Reference => {
                    Value::Reference(ReferenceValue::Unknown { not_null })
                }
                other => Value::unknown(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes::*, InstructionAssembler, Operand},
        classfile::MethodAccessFlags,
        evaluation::{BasicInvocationUnit, SeededInvocationUnit},
    };

    fn method(access: MethodAccessFlags, descriptor: &str) -> ProgramMethod {
        ProgramMethod::new(access, "m", descriptor, None)
    }

    fn evaluate(
        code: &CodeAttribute,
        access: MethodAccessFlags,
        descriptor: &str,
    ) -> Result<Evaluation> {
        PartialEvaluator::new(&BasicInvocationUnit).evaluate(
            &ConstantPool::new(),
            "a/A",
            &method(access, descriptor),
            code,
        )
    }

    #[test]
    fn test_constant_branch_leaves_dead_code_untraced() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(0)
            .branch(IFEQ, "skip")
            .iconst(1)
            .op(IRETURN)
            .label("skip")
            .iconst(2)
            .op(IRETURN)
            .finish(1, &pool)
            .unwrap();
        let evaluation = evaluate(&code, MethodAccessFlags::STATIC, "()I").unwrap();

        assert!(evaluation.is_traced(0));
        assert!(evaluation.is_traced(1));
        assert!(!evaluation.is_traced(4));
        assert!(!evaluation.is_traced(5));
        assert!(evaluation.is_traced(6));
        assert_eq!(evaluation.targets(1).iter().collect::<Vec<_>>(), vec![6]);
        assert_eq!(evaluation.origins(6).iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(evaluation.traced_count(), 4);
    }

    #[test]
    fn test_parameters_are_symbolic_and_loads_copy_them() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .load(ComputationalType::Int, 1)
            .op(IRETURN)
            .finish(2, &pool)
            .unwrap();
        let evaluation = evaluate(&code, MethodAccessFlags::PUBLIC, "(I)I").unwrap();

        let this = &evaluation.vars_before(0).unwrap().load(0).unwrap().value;
        assert_eq!(this.symbol(), Some(Symbol::Parameter(0)));
        assert!(this.is_not_null());
        let pushed = evaluation.stack_after(0).unwrap().peek(0).unwrap();
        assert_eq!(pushed.value.symbol(), Some(Symbol::Parameter(1)));
        assert_eq!(pushed.producers, OriginSet::instruction(0));
    }

    #[test]
    fn test_loop_reaches_fixpoint_and_joins_counters() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(0)
            .store(ComputationalType::Int, 0)
            .label("head")
            .load(ComputationalType::Int, 0)
            .iconst(10)
            .branch(IF_ICMPGE, "done")
            .iinc(0, 1)
            .branch(GOTO, "head")
            .label("done")
            .op(RETURN)
            .finish(1, &pool)
            .unwrap();
        let evaluation = evaluate(&code, MethodAccessFlags::STATIC, "()V").unwrap();

        let head = code
            .instructions()
            .unwrap()
            .into_iter()
            .find(|(_, i)| i.opcode == ILOAD_0)
            .map(|(offset, _)| offset)
            .unwrap();
        let counter = &evaluation.vars_before(head).unwrap().load(0).unwrap().value;
        assert!(!counter.is_particular());
        assert_eq!(evaluation.origins(head).len(), 2);
        assert!(evaluation.instructions().all(|(o, _)| evaluation.is_traced(o)));
    }

    #[test]
    fn test_handler_entry_state() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .label("start")
            .iconst(7)
            .store(ComputationalType::Int, 0)
            .label("end")
            .op(RETURN)
            .label("handler")
            .op(ATHROW)
            .try_catch("start", "end", "handler", 0)
            .finish(1, &pool)
            .unwrap();
        let evaluation = evaluate(&code, MethodAccessFlags::STATIC, "()V").unwrap();

        let handler = code.exception_table[0].handler_pc as usize;
        assert!(evaluation.is_traced(handler));
        let stack = evaluation.stack_before(handler).unwrap();
        assert_eq!(stack.size(), 1);
        assert!(stack.peek(0).unwrap().value.is_not_null());
        assert!(stack
            .peek(0)
            .unwrap()
            .producers
            .contains(Origin::ExceptionHandler(handler as u32)));
        // entered before the store at offset 1 as well as before the push at offset 0
        let local = &evaluation.vars_before(handler).unwrap().load(0).unwrap().value;
        assert_eq!(*local, Value::Top);
    }

    #[test]
    fn test_subroutines_record_returning_entries() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .branch(JSR, "sub")
            .op(RETURN)
            .label("sub")
            .store(ComputationalType::Reference, 0)
            .insn(Instruction::new(RET, Operand::Local(0)))
            .finish(1, &pool)
            .unwrap();
        let evaluation = evaluate(&code, MethodAccessFlags::STATIC, "()V").unwrap();

        assert!(evaluation.is_subroutine_returning(4));
        assert_eq!(evaluation.targets(0).iter().collect::<Vec<_>>(), vec![4]);
        assert_eq!(evaluation.targets(5).iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(
            evaluation.vars_after(4).unwrap().load(0).unwrap().value,
            Value::ReturnAddress(OffsetSet::single(3))
        );
    }

    #[test]
    fn test_visit_limit() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(0)
            .store(ComputationalType::Int, 0)
            .label("head")
            .iinc(0, 1)
            .branch(GOTO, "head")
            .finish(1, &pool)
            .unwrap();
        let result = PartialEvaluator::new(&BasicInvocationUnit)
            .with_max_visits(1)
            .evaluate(
                &pool,
                "a/A",
                &method(MethodAccessFlags::STATIC, "()V"),
                &code,
            );
        assert!(matches!(result, Err(Error::EvaluationLimit { limit: 1, .. })));
    }

    #[test]
    fn test_simple_factory_forgets_constants() {
        let pool = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(0)
            .branch(IFEQ, "skip")
            .op(RETURN)
            .label("skip")
            .op(RETURN)
            .finish(0, &pool)
            .unwrap();
        let evaluation = PartialEvaluator::simple(&BasicInvocationUnit, None)
            .evaluate(
                &pool,
                "a/A",
                &method(MethodAccessFlags::STATIC, "()V"),
                &code,
            )
            .unwrap();
        assert!(evaluation.is_traced(4));
        assert!(evaluation.is_traced(5));

        let mut unit = SeededInvocationUnit::new();
        unit.set_parameter("a/A", "m", "(I)V", 0, Value::int(3));
        let code = InstructionAssembler::new()
            .load(ComputationalType::Int, 0)
            .op(POP)
            .op(RETURN)
            .finish(1, &pool)
            .unwrap();
        let evaluation = PartialEvaluator::new(&unit)
            .evaluate(
                &pool,
                "a/A",
                &method(MethodAccessFlags::STATIC, "(I)V"),
                &code,
            )
            .unwrap();
        assert_eq!(
            evaluation.stack_after(0).unwrap().peek(0).unwrap().value,
            Value::int(3)
        );
    }
}
