//! Necessity marking.
//!
//! Marks are kept at two granularities:
//!
//! - an instruction is *necessary* when it has to stay in the code, either in its original
//!   form or as its local simplification;
//! - a stack word is identified by its producer and its absolute stack position, and is
//!   *needed* when a necessary instruction consumes it, or *present* when it has to be on
//!   the stack anyway so that every path reaching a merge point agrees on the stack shape.
//!
//! Every needed word is present. A present word that nobody needs is popped after its
//! producer or pushed as a dummy constant if its producer goes away. Words produced by the
//! `dup` family and `swap` are traced back to the input words they copy, so those
//! instructions never become necessary themselves and are rewritten from the presence of
//! their inputs and outputs instead.
//!
//! Marking runs over the code that is reachable from the entry point and from live
//! exception handlers. A handler is live while its protected range contains a necessary
//! instruction, so marking is repeated until the set of live handlers is stable.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    assembly::{opcodes::*, FlowType, Instruction, LocalAccess, StackMove},
    classfile::{CodeAttribute, ConstantPool, ProgramMethod},
    evaluation::{Evaluation, InvocationUnit, Origin, PartialEvaluator, TracedStack},
    optimize::simplifier::{stackmove, stackmove::Word, Simplification},
    utils::BitSet,
    Result,
};

/// A pending mark.
#[derive(Debug, Clone, Copy)]
enum Mark {
    Necessary(usize),
    Needed(Origin, usize),
    Present(Origin, usize),
}

/// The outcome of marking one method body.
#[derive(Debug)]
pub(super) struct Marks {
    /// Traced offsets reachable from the entry point or a live handler
    pub reachable: BitSet,
    /// Offsets that stay in the code
    pub necessary: BitSet,
    /// Per exception table entry, whether the handler is kept
    pub live_handlers: Vec<bool>,
    needed: FxHashSet<(Origin, usize)>,
    present: FxHashSet<(Origin, usize)>,
}

impl Marks {
    fn new(length: usize, live_handlers: Vec<bool>) -> Self {
        Marks {
            reachable: BitSet::new(length),
            necessary: BitSet::new(length),
            live_handlers,
            needed: FxHashSet::default(),
            present: FxHashSet::default(),
        }
    }

    /// Returns `true` if the word `origin` pushes at `position` stays on the stack.
    pub fn is_present(&self, origin: Origin, position: usize) -> bool {
        self.present.contains(&(origin, position))
    }

    /// Returns `true` if the word at `position` of `stack` stays on the stack.
    pub fn word_present(&self, stack: &TracedStack, position: usize) -> bool {
        stack
            .get(position)
            .is_some_and(|word| word.producers.iter().any(|g| self.is_present(g, position)))
    }

    /// The present input and output words of the stack manipulation at `offset`.
    pub fn stack_move_words(
        &self,
        offset: usize,
        instruction: &Instruction,
        before: &TracedStack,
    ) -> Result<(Vec<Word>, Vec<Word>)> {
        let movement = StackMove::of(instruction.opcode).ok_or_else(|| {
            malformed_error!("{} is not a stack manipulation", instruction.mnemonic())
        })?;
        let base = before
            .size()
            .checked_sub(movement.pops)
            .ok_or_else(|| malformed_error!("Operand stack underflow at {}", offset))?;
        let upper = |source: usize| {
            before
                .get(base + source)
                .is_some_and(|word| word.value.is_category2())
        };

        let inputs = (0..movement.pops)
            .filter(|&k| self.word_present(before, base + k))
            .map(|k| Word {
                source: k,
                upper: upper(k),
            })
            .collect();
        let produced = Origin::Instruction(offset as u32);
        let outputs = movement
            .outputs
            .iter()
            .enumerate()
            .filter(|&(k, _)| self.is_present(produced, base + k))
            .map(|(_, &source)| Word {
                source,
                upper: upper(source),
            })
            .collect();
        Ok((inputs, outputs))
    }
}

/// The local variable slot an instruction reads, if any.
pub(super) fn read_variable(instruction: &Instruction) -> Option<u16> {
    match instruction.local_access() {
        Some((LocalAccess::Load, _, index)) => Some(index),
        Some((LocalAccess::Store, _, _)) => None,
        None => instruction.local_index(),
    }
}

/// Computes necessity and presence marks for one method body.
pub(super) struct Marker<'a> {
    pub pool: &'a ConstantPool,
    pub class_name: &'a str,
    pub method: &'a ProgramMethod,
    pub code: &'a CodeAttribute,
    pub evaluation: &'a Evaluation,
    pub unit: &'a dyn InvocationUnit,
    pub max_visits: usize,
    /// Traced offsets whose instruction has side effects
    pub side_effects: &'a BitSet,
}

/// Mutable state of one marking round.
struct Round {
    marks: Marks,
    occurrences: FxHashMap<(Origin, usize), Vec<usize>>,
    worklist: Vec<Mark>,
}

impl Marker<'_> {
    /// Marks the method body. Local simplifications may be turned into infinite loops.
    ///
    /// # Errors
    ///
    /// Returns an error for inconsistent evaluation results and for stack manipulations
    /// that can not be rewritten.
    pub fn run(&self, simplifications: &mut [Option<Simplification>]) -> Result<Marks> {
        let original = simplifications.to_vec();
        let mut live: Vec<bool> = self
            .code
            .exception_table
            .iter()
            .map(|handler| self.evaluation.is_traced(handler.handler_pc as usize))
            .collect();

        loop {
            simplifications.clone_from_slice(&original);
            let mut round = self.start_round(live.clone());
            let reachable = round.marks.reachable.clone();
            let simple = PartialEvaluator::simple(self.unit, Some(&reachable))
                .with_max_visits(self.max_visits)
                .evaluate(self.pool, self.class_name, self.method, self.code)?;

            self.seed(&mut round, simplifications)?;
            loop {
                self.propagate(&mut round, simplifications)?;
                let mut changed = self.mark_straddling_branches(&mut round, simplifications)?;
                changed |= self.mark_variable_producers(&mut round, &simple, simplifications)?;
                if !changed {
                    changed = self.mark_infinite_loop(&mut round, simplifications)?;
                }
                if !changed {
                    break;
                }
            }

            let still_live: Vec<bool> = self
                .code
                .exception_table
                .iter()
                .zip(&live)
                .map(|(handler, &was_live)| {
                    was_live
                        && round.marks.necessary.any_in_range(
                            handler.start_pc as usize..handler.end_pc as usize,
                        )
                })
                .collect();
            if still_live == live {
                self.revert_loops(&round, simplifications, &original)?;
                return Ok(round.marks);
            }
            log::trace!(
                "{}.{}{}: {} handlers left, marking again",
                self.class_name,
                self.method.name,
                self.method.descriptor,
                still_live.iter().filter(|&&l| l).count()
            );
            live = still_live;
        }
    }

    fn start_round(&self, live: Vec<bool>) -> Round {
        let evaluation = self.evaluation;
        let mut marks = Marks::new(evaluation.code_length(), live);

        let mut pending: Vec<usize> = self
            .code
            .exception_table
            .iter()
            .zip(&marks.live_handlers)
            .filter(|(_, live)| **live)
            .map(|(handler, _)| handler.handler_pc as usize)
            .collect();
        if evaluation.is_traced(0) {
            pending.push(0);
        }
        while let Some(offset) = pending.pop() {
            if evaluation.is_traced(offset) && marks.reachable.insert(offset) {
                pending.extend(evaluation.targets(offset).iter());
            }
        }

        let mut occurrences: FxHashMap<(Origin, usize), Vec<usize>> = FxHashMap::default();
        for offset in marks.reachable.iter() {
            let Some(stack) = evaluation.stack_before(offset) else {
                continue;
            };
            for (position, word) in stack.words().iter().enumerate() {
                for producer in word.producers.iter() {
                    occurrences
                        .entry((producer, position))
                        .or_default()
                        .push(offset);
                }
            }
        }

        Round {
            marks,
            occurrences,
            worklist: Vec::new(),
        }
    }

    fn seed(&self, round: &mut Round, simplifications: &[Option<Simplification>]) -> Result<()> {
        for (handler, &live) in self
            .code
            .exception_table
            .iter()
            .zip(&round.marks.live_handlers)
        {
            if live {
                round
                    .worklist
                    .push(Mark::Present(Origin::ExceptionHandler(handler.handler_pc), 0));
            }
        }
        if let Some(offset) = self.evaluation.super_initialization_offset() {
            Self::require(round, offset);
        }
        for offset in round.marks.reachable.iter().collect::<Vec<_>>() {
            let instruction = self.instruction(offset)?;
            let self_loop = matches!(instruction.opcode, GOTO | GOTO_W)
                && instruction.branch_targets(offset)?.first() == Some(&offset);
            if self_loop
                || (self.side_effects.contains(offset) && simplifications[offset].is_none())
            {
                Self::require(round, offset);
            }
        }
        Ok(())
    }

    /// Queues `offset` as necessary; returns `true` if that is news.
    fn require(round: &mut Round, offset: usize) -> bool {
        if round.marks.reachable.contains(offset) && !round.marks.necessary.contains(offset) {
            round.worklist.push(Mark::Necessary(offset));
            true
        } else {
            false
        }
    }

    fn instruction(&self, offset: usize) -> Result<&Instruction> {
        self.evaluation
            .instruction(offset)
            .ok_or_else(|| malformed_error!("No instruction starts at {}", offset))
    }

    fn stack_before(&self, offset: usize) -> Result<&TracedStack> {
        self.evaluation
            .stack_before(offset)
            .ok_or_else(|| malformed_error!("No stack recorded before {}", offset))
    }

    /// For a word pushed by a `dup` or `swap`, the position of the input word it copies.
    fn source_position(&self, offset: usize, position: usize) -> Result<Option<usize>> {
        let instruction = self.instruction(offset)?;
        if !instruction.is_dup_or_swap() {
            return Ok(None);
        }
        let Some(movement) = StackMove::of(instruction.opcode) else {
            return Ok(None);
        };
        let base = self
            .stack_before(offset)?
            .size()
            .checked_sub(movement.pops)
            .ok_or_else(|| malformed_error!("Operand stack underflow at {}", offset))?;
        let source = position
            .checked_sub(base)
            .and_then(|k| movement.outputs.get(k))
            .ok_or_else(|| {
                malformed_error!("{} at {} pushes no word at {}", instruction, offset, position)
            })?;
        Ok(Some(base + source))
    }

    fn propagate(
        &self,
        round: &mut Round,
        simplifications: &[Option<Simplification>],
    ) -> Result<()> {
        while let Some(mark) = round.worklist.pop() {
            match mark {
                Mark::Necessary(offset) => {
                    if round.marks.necessary.insert(offset) {
                        self.visit_necessary(round, offset, simplifications)?;
                    }
                }
                Mark::Needed(origin, position) => {
                    if round.marks.needed.insert((origin, position)) {
                        self.visit_needed(round, origin, position)?;
                    }
                }
                Mark::Present(origin, position) => {
                    if round.marks.present.insert((origin, position)) {
                        self.visit_present(round, origin, position)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn visit_necessary(
        &self,
        round: &mut Round,
        offset: usize,
        simplifications: &[Option<Simplification>],
    ) -> Result<()> {
        let instruction = self.instruction(offset)?;
        match &simplifications[offset] {
            Some(Simplification::Alias(slot)) => {
                self.require_variable_producers(round, self.evaluation, offset, *slot)?;
            }
            Some(_) => {}
            None if instruction.is_stack_manipulation() => {}
            None => {
                let stack = self.stack_before(offset)?;
                let effect = instruction.stack_effect(self.pool)?;
                let bottom = stack
                    .size()
                    .checked_sub(effect.pops)
                    .ok_or_else(|| malformed_error!("Operand stack underflow at {}", offset))?;
                for (position, word) in stack.words().iter().enumerate().skip(bottom) {
                    for producer in word.producers.iter() {
                        round.worklist.push(Mark::Needed(producer, position));
                    }
                }
                if let Some(slot) = read_variable(instruction) {
                    self.require_variable_producers(round, self.evaluation, offset, slot)?;
                }
                if instruction.opcode == NEW {
                    if let Some(initializer) = self.evaluation.initialization_offset(offset) {
                        Self::require(round, initializer);
                    }
                }
            }
        }
        Ok(())
    }

    /// Requires the instructions that may have stored the value `offset` reads from `slot`,
    /// according to `evaluation`. Returns `true` if anything was new.
    fn require_variable_producers(
        &self,
        round: &mut Round,
        evaluation: &Evaluation,
        offset: usize,
        slot: u16,
    ) -> Result<bool> {
        let Some(vars) = evaluation.vars_before(offset) else {
            return Ok(false);
        };
        let mut changed = false;
        for producer in vars.load(slot)?.producers.instructions() {
            changed |= Self::require(round, producer);
        }
        Ok(changed)
    }

    fn visit_needed(&self, round: &mut Round, origin: Origin, position: usize) -> Result<()> {
        round.worklist.push(Mark::Present(origin, position));
        let Some(offset) = origin.instruction() else {
            return Ok(());
        };
        if !round.marks.reachable.contains(offset) {
            return Ok(());
        }
        match self.source_position(offset, position)? {
            Some(source) => {
                let stack = self.stack_before(offset)?;
                if let Some(word) = stack.get(source) {
                    for producer in word.producers.iter() {
                        round.worklist.push(Mark::Needed(producer, source));
                    }
                }
            }
            None => {
                Self::require(round, offset);
            }
        }
        Ok(())
    }

    fn visit_present(&self, round: &mut Round, origin: Origin, position: usize) -> Result<()> {
        if let Some(offset) = origin.instruction() {
            if round.marks.reachable.contains(offset) {
                if let Some(source) = self.source_position(offset, position)? {
                    let stack = self.stack_before(offset)?;
                    if let Some(word) = stack.get(source) {
                        for producer in word.producers.iter() {
                            round.worklist.push(Mark::Present(producer, source));
                        }
                    }
                }
                if let Some(partner) = self
                    .evaluation
                    .stack_after(offset)
                    .and_then(|after| after.partner(position))
                {
                    round.worklist.push(Mark::Present(origin, partner));
                }
            }
        }

        let occurrences = round
            .occurrences
            .get(&(origin, position))
            .cloned()
            .unwrap_or_default();
        for offset in occurrences {
            let stack = self.stack_before(offset)?;
            let partner = stack.partner(position);
            for index in std::iter::once(position).chain(partner) {
                if let Some(word) = stack.get(index) {
                    for producer in word.producers.iter() {
                        round.worklist.push(Mark::Present(producer, index));
                    }
                }
            }
        }
        Ok(())
    }

    /// Offsets that end up emitting code: necessary instructions plus unnecessary ones that
    /// leave pops, dummy pushes or a reduced stack move behind.
    fn live_code(&self, round: &Round) -> Result<BitSet> {
        let marks = &round.marks;
        let mut live = marks.necessary.clone();
        for offset in marks.reachable.iter() {
            if marks.necessary.contains(offset) {
                continue;
            }
            let instruction = self.instruction(offset)?;
            let before = self.stack_before(offset)?;
            let emits = if instruction.is_stack_manipulation() {
                let (inputs, outputs) = marks.stack_move_words(offset, instruction, before)?;
                stackmove::solve(&inputs, &outputs).is_none_or(|sequence| !sequence.is_empty())
            } else {
                let effect = instruction.stack_effect(self.pool)?;
                let height = before.size();
                let consumed = height.saturating_sub(effect.pops)..height;
                let produced = self
                    .evaluation
                    .stack_after(offset)
                    .map_or(0..0, |after| after.size().saturating_sub(effect.pushes)..after.size());
                let origin = Origin::Instruction(offset as u32);
                consumed.clone().any(|p| marks.word_present(before, p))
                    || produced.clone().any(|p| marks.is_present(origin, p))
            };
            if emits {
                live.insert(offset);
            }
        }
        Ok(live)
    }

    /// Branch targets of a traced instruction after its local simplification.
    fn targets(
        &self,
        offset: usize,
        simplification: Option<&Simplification>,
    ) -> Vec<usize> {
        match simplification {
            Some(Simplification::Goto(target)) => vec![*target],
            Some(Simplification::Drop) => vec![self.evaluation.next_offset(offset)],
            Some(Simplification::InfiniteLoop) => vec![offset],
            _ => self.evaluation.targets(offset).iter().collect(),
        }
    }

    /// Keeps unnecessary branches that jump over code that stays.
    fn mark_straddling_branches(
        &self,
        round: &mut Round,
        simplifications: &[Option<Simplification>],
    ) -> Result<bool> {
        let live = self.live_code(round)?;
        let mut changed = false;
        for offset in round.marks.reachable.iter().collect::<Vec<_>>() {
            if round.marks.necessary.contains(offset) {
                continue;
            }
            let targets = match &simplifications[offset] {
                Some(Simplification::Goto(target)) => vec![*target],
                Some(_) => continue,
                None => match self.instruction(offset)?.flow_type() {
                    FlowType::ConditionalBranch
                    | FlowType::UnconditionalBranch
                    | FlowType::Switch => self.evaluation.targets(offset).iter().collect(),
                    _ => continue,
                },
            };
            let next = self.evaluation.next_offset(offset);
            let straddles = targets.iter().any(|&target| {
                if target >= next {
                    live.any_in_range(next..target)
                } else {
                    live.any_in_range(target..offset)
                }
            });
            if straddles {
                changed |= Self::require(round, offset);
            }
        }
        Ok(changed)
    }

    /// Requires the stores that the simple evaluation, which follows every edge, still sees
    /// as producers of variables read by necessary instructions.
    fn mark_variable_producers(
        &self,
        round: &mut Round,
        simple: &Evaluation,
        simplifications: &[Option<Simplification>],
    ) -> Result<bool> {
        let mut changed = false;
        for offset in round.marks.necessary.iter().collect::<Vec<_>>() {
            let slot = match &simplifications[offset] {
                Some(Simplification::Alias(slot)) => *slot,
                Some(_) => continue,
                None => match read_variable(self.instruction(offset)?) {
                    Some(slot) => slot,
                    None => continue,
                },
            };
            changed |= self.require_variable_producers(round, simple, offset, slot)?;
        }
        Ok(changed)
    }

    /// The target of an unnecessary backward `goto`, or of a conditional simplified to one.
    fn backward_goto(
        &self,
        offset: usize,
        simplification: Option<&Simplification>,
    ) -> Result<Option<usize>> {
        let target = match simplification {
            Some(Simplification::Goto(target)) => Some(*target),
            Some(_) => None,
            None => {
                let instruction = self.instruction(offset)?;
                if matches!(instruction.opcode, GOTO | GOTO_W) {
                    instruction.branch_targets(offset)?.first().copied()
                } else {
                    None
                }
            }
        };
        Ok(target.filter(|&target| target <= offset))
    }

    /// Returns `true` if control can leave `[head, offset]` from inside.
    fn loop_exits(
        &self,
        round: &Round,
        head: usize,
        offset: usize,
        simplifications: &[Option<Simplification>],
    ) -> Result<bool> {
        for inner in round.marks.reachable.iter() {
            if inner < head || inner >= offset {
                continue;
            }
            let flow = self.instruction(inner)?.flow_type();
            if matches!(flow, FlowType::Return | FlowType::Throw) {
                return Ok(true);
            }
            let leaves = self
                .targets(inner, simplifications[inner].as_ref())
                .into_iter()
                .any(|target| target < head || target > offset);
            let caught = self
                .code
                .exception_table
                .iter()
                .zip(&round.marks.live_handlers)
                .any(|(handler, &live)| {
                    let pc = handler.handler_pc as usize;
                    live && handler.covers(inner as u32) && (pc < head || pc > offset)
                });
            if leaves || caught {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Turns the first unnecessary backward `goto` around a loop with no code left and no
    /// way out into an explicit infinite loop, so that the loop is not deleted.
    fn mark_infinite_loop(
        &self,
        round: &mut Round,
        simplifications: &mut [Option<Simplification>],
    ) -> Result<bool> {
        let live = self.live_code(round)?;
        for offset in round.marks.reachable.iter().collect::<Vec<_>>() {
            if round.marks.necessary.contains(offset) {
                continue;
            }
            let Some(head) = self.backward_goto(offset, simplifications[offset].as_ref())? else {
                continue;
            };
            if live.any_in_range(head..offset) {
                continue;
            }
            let before = self.stack_before(offset)?;
            let height = before.size();
            let pops = self.instruction(offset)?.stack_effect(self.pool)?.pops;
            if (height.saturating_sub(pops)..height).any(|p| round.marks.word_present(before, p))
            {
                continue;
            }
            if self.loop_exits(round, head, offset, simplifications)? {
                continue;
            }
            log::trace!("{offset:5}: keeping infinite loop from {head}");
            simplifications[offset] = Some(Simplification::InfiniteLoop);
            Self::require(round, offset);
            return Ok(true);
        }
        Ok(false)
    }

    /// Restores loops whose body turned out to keep code after all.
    fn revert_loops(
        &self,
        round: &Round,
        simplifications: &mut [Option<Simplification>],
        original: &[Option<Simplification>],
    ) -> Result<()> {
        let live = self.live_code(round)?;
        for offset in 0..simplifications.len() {
            if simplifications[offset] != Some(Simplification::InfiniteLoop) {
                continue;
            }
            let head = self.backward_goto(offset, original[offset].as_ref())?;
            if head.is_some_and(|head| live.any_in_range(head..offset)) {
                simplifications[offset] = original[offset].clone();
            }
        }
        Ok(())
    }
}
