//! Translation of marks and local simplifications into code edits.

use crate::{
    assembly::{opcodes::*, CodeAttributeEditor, FlowType, Instruction, Operand},
    classfile::{CodeAttribute, ComputationalType, Constant, ConstantPool},
    evaluation::{Evaluation, Origin, TracedStack, Value},
    optimize::simplifier::{marking::Marks, stackmove, Simplification, SimplificationReport},
    utils::BitSet,
    Error, Result,
};

/// The shortest instruction pushing `value` without a constant pool entry, if there is one.
pub(super) fn short_constant(value: &Value) -> Option<Instruction> {
    if value.is_null() {
        return Some(Instruction::simple(ACONST_NULL));
    }
    if let Some(v) = value.as_int() {
        return Instruction::push_int(v);
    }
    if let Some(v) = value.as_long() {
        return match v {
            0 => Some(Instruction::simple(LCONST_0)),
            1 => Some(Instruction::simple(LCONST_1)),
            _ => None,
        };
    }
    if let Some(v) = value.as_float() {
        return [0.0f32, 1.0, 2.0]
            .iter()
            .position(|c| c.to_bits() == v.to_bits())
            .map(|n| Instruction::simple(FCONST_0 + n as u8));
    }
    if let Some(v) = value.as_double() {
        return [0.0f64, 1.0]
            .iter()
            .position(|c| c.to_bits() == v.to_bits())
            .map(|n| Instruction::simple(DCONST_0 + n as u8));
    }
    None
}

/// The instruction pushing `value`, adding a constant pool entry when needed.
fn constant_instruction(pool: &mut ConstantPool, value: &Value) -> Result<Instruction> {
    if let Some(instruction) = short_constant(value) {
        return Ok(instruction);
    }
    let (constant, wide) = if let Some(v) = value.as_int() {
        (Constant::Integer(v), false)
    } else if let Some(v) = value.as_float() {
        (Constant::Float(v), false)
    } else if let Some(v) = value.as_long() {
        (Constant::Long(v), true)
    } else if let Some(v) = value.as_double() {
        (Constant::Double(v), true)
    } else {
        return Err(malformed_error!("No constant push for {}", value));
    };
    let index = pool.find_or_add(constant)?;
    let opcode = match (wide, index) {
        (true, _) => LDC2_W,
        (false, 0..=255) => LDC,
        (false, _) => LDC_W,
    };
    Ok(Instruction::new(opcode, Operand::Constant(index)))
}

/// A push of a placeholder of the same kind as `value`.
fn dummy_push(value: &Value, offset: usize) -> Result<Instruction> {
    let opcode = match value.computational_type() {
        Some(ComputationalType::Int) => ICONST_0,
        Some(ComputationalType::Long) => LCONST_0,
        Some(ComputationalType::Float) => FCONST_0,
        Some(ComputationalType::Double) => DCONST_0,
        Some(ComputationalType::Reference) => ACONST_NULL,
        None => {
            return Err(malformed_error!(
                "No placeholder for {} pushed at {}",
                value,
                offset
            ))
        }
    };
    Ok(Instruction::simple(opcode))
}

fn pop(words: usize) -> Instruction {
    Instruction::simple(if words == 2 { POP2 } else { POP })
}

fn displacement(offset: usize, target: usize) -> Result<i32> {
    i32::try_from(target as i64 - offset as i64).map_err(|_| Error::InvalidBranch {
        origin: offset,
        target: target as i64,
    })
}

/// Collects the edits of one method body.
pub(super) struct Fixup<'a> {
    pub evaluation: &'a Evaluation,
    pub marks: &'a Marks,
    pub simplifications: &'a [Option<Simplification>],
    pub editor: CodeAttributeEditor,
    pub report: SimplificationReport,
    /// Pops left in place to discard the result of the necessary instruction before them
    kept_pops: BitSet,
}

impl<'a> Fixup<'a> {
    pub fn new(
        evaluation: &'a Evaluation,
        marks: &'a Marks,
        simplifications: &'a [Option<Simplification>],
    ) -> Self {
        Fixup {
            evaluation,
            marks,
            simplifications,
            editor: CodeAttributeEditor::new(evaluation.code_length()),
            report: SimplificationReport::default(),
            kept_pops: BitSet::new(evaluation.code_length()),
        }
    }

    /// Stages the edits for every instruction and exception handler.
    pub fn run(&mut self, pool: &mut ConstantPool, code: &CodeAttribute) -> Result<()> {
        let evaluation = self.evaluation;
        let simplifications = self.simplifications;
        for (offset, instruction) in evaluation.instructions() {
            if !self.marks.reachable.contains(offset) {
                self.editor.delete(offset);
                self.report.instructions_deleted += 1;
                continue;
            }
            let simplification = simplifications[offset].as_ref();
            if simplification.is_some()
                && matches!(
                    instruction.flow_type(),
                    FlowType::ConditionalBranch | FlowType::Switch
                )
            {
                self.report.branches_simplified += 1;
            }

            if instruction.is_stack_manipulation() {
                self.stack_move(offset, instruction)?;
            } else if self.marks.necessary.contains(offset) {
                self.necessary(pool, offset, instruction, simplification)?;
            } else {
                self.unnecessary(pool, offset, instruction)?;
            }
        }

        for (index, live) in self.marks.live_handlers.iter().enumerate() {
            if !live {
                log::trace!(
                    "removing handler {} at {}",
                    index,
                    code.exception_table[index].handler_pc
                );
                self.editor.remove_exception_handler(index);
            }
        }
        Ok(())
    }

    fn stack(stack: Option<&TracedStack>, offset: usize) -> Result<&TracedStack> {
        stack.ok_or_else(|| malformed_error!("No stack recorded at {}", offset))
    }

    /// Pops for the present words among the `count` words the instruction at `offset`
    /// consumes, top first.
    fn input_pops(&mut self, offset: usize, count: usize) -> Result<Vec<Instruction>> {
        let stack = Self::stack(self.evaluation.stack_before(offset), offset)?;
        let bottom = stack
            .size()
            .checked_sub(count)
            .ok_or_else(|| malformed_error!("Operand stack underflow at {}", offset))?;
        let mut pops = Vec::new();
        let mut position = stack.size();
        while position > bottom {
            let top = position - 1;
            let words = match stack.get(top) {
                Some(word) if word.value.is_category2() && top > bottom => 2,
                _ => 1,
            };
            if self.marks.word_present(stack, top) {
                pops.push(pop(words));
            }
            position -= words;
        }
        self.report.pops_inserted += pops.len();
        Ok(pops)
    }

    /// The value the instruction at `offset` pushes, if it is present.
    fn present_output(&self, offset: usize, pushes: usize) -> Result<Option<&Value>> {
        if pushes == 0 {
            return Ok(None);
        }
        let after = Self::stack(self.evaluation.stack_after(offset), offset)?;
        let top = after
            .size()
            .checked_sub(1)
            .ok_or_else(|| malformed_error!("Nothing pushed at {}", offset))?;
        if !self.marks.is_present(Origin::Instruction(offset as u32), top) {
            return Ok(None);
        }
        Ok(after.get(top).map(|word| &word.value))
    }

    fn replace(&mut self, offset: usize, original: &Instruction, replacement: Vec<Instruction>) {
        if replacement.len() != 1 || replacement[0] != *original {
            self.editor.replace(offset, replacement);
        }
    }

    fn necessary(
        &mut self,
        pool: &mut ConstantPool,
        offset: usize,
        instruction: &Instruction,
        simplification: Option<&Simplification>,
    ) -> Result<()> {
        let effect = instruction.stack_effect(pool)?;
        match simplification {
            None => {
                let output_present = self.present_output(offset, effect.pushes)?.is_some();
                if matches!(instruction.opcode, JSR | JSR_W) && !output_present {
                    let target = instruction
                        .branch_targets(offset)?
                        .first()
                        .copied()
                        .ok_or_else(|| malformed_error!("jsr without target at {}", offset))?;
                    if self.evaluation.is_subroutine_returning(target) {
                        return Err(malformed_error!(
                            "Return address of jsr at {} is unused but the subroutine returns",
                            offset
                        ));
                    }
                    let goto = if instruction.opcode == JSR_W { GOTO_W } else { GOTO };
                    self.editor
                        .replace(offset, vec![Instruction::new(goto, instruction.operand.clone())]);
                } else if effect.pushes > 0 && !output_present {
                    match self.discarding_pop(offset, effect.pushes) {
                        Some(next) => {
                            self.kept_pops.insert(next);
                        }
                        None => {
                            self.editor.insert_after(offset, vec![pop(effect.pushes)]);
                            self.report.pops_inserted += 1;
                        }
                    }
                }
                if matches!(instruction.opcode, GOTO | GOTO_W)
                    && instruction.branch_targets(offset)?.first() == Some(&offset)
                {
                    self.report.loops_preserved += 1;
                }
            }
            Some(Simplification::Constant(value)) => {
                let mut replacement = self.input_pops(offset, effect.pops)?;
                replacement.push(constant_instruction(pool, value)?);
                self.replace(offset, instruction, replacement);
                self.report.constants_folded += 1;
            }
            Some(Simplification::Alias(slot)) => {
                let (_, kind, _) = instruction.local_access().ok_or_else(|| {
                    malformed_error!("Aliased {} at {} is not a load", instruction, offset)
                })?;
                self.editor
                    .replace(offset, vec![Instruction::load(kind, *slot)]);
                self.report.loads_aliased += 1;
            }
            Some(Simplification::Goto(target)) => {
                let mut replacement = self.input_pops(offset, effect.pops)?;
                replacement.push(Instruction::branch(GOTO, displacement(offset, *target)?));
                self.editor.replace(offset, replacement);
            }
            Some(Simplification::InfiniteLoop) => {
                let mut replacement = self.input_pops(offset, effect.pops)?;
                replacement.push(Instruction::branch(GOTO, 0));
                self.replace(offset, instruction, replacement);
                self.report.loops_preserved += 1;
            }
            Some(Simplification::Drop) => {
                let replacement = self.input_pops(offset, effect.pops)?;
                self.editor.replace(offset, replacement);
                self.report.instructions_deleted += 1;
            }
        }
        Ok(())
    }

    fn unnecessary(
        &mut self,
        pool: &ConstantPool,
        offset: usize,
        instruction: &Instruction,
    ) -> Result<()> {
        let effect = instruction.stack_effect(pool)?;
        let placeholder = match self.present_output(offset, effect.pushes)? {
            Some(value) => Some(dummy_push(value, offset)?),
            None => None,
        };
        if effect.pops == 0 && placeholder.as_ref() == Some(instruction) {
            return Ok(());
        }
        let mut replacement = self.input_pops(offset, effect.pops)?;
        if let Some(push) = placeholder {
            replacement.push(push);
            self.report.pushes_inserted += 1;
        }
        self.editor.replace(offset, replacement);
        self.report.instructions_deleted += 1;
        Ok(())
    }

    /// The offset of a `pop`/`pop2` right after `offset` that discards exactly the
    /// `pushes` words the instruction at `offset` pushes, and nothing else.
    fn discarding_pop(&self, offset: usize, pushes: usize) -> Option<usize> {
        let next = self.evaluation.next_offset(offset);
        let expected = if pushes == 2 { POP2 } else { POP };
        if self.evaluation.instruction(next)?.opcode != expected
            || !self.marks.reachable.contains(next)
        {
            return None;
        }
        let before = self.evaluation.stack_before(next)?;
        let top = before.peek(0)?;
        let only_producer = top.producers.iter().eq([Origin::Instruction(offset as u32)]);
        only_producer.then_some(next)
    }

    fn stack_move(&mut self, offset: usize, instruction: &Instruction) -> Result<()> {
        if self.kept_pops.contains(offset) {
            return Ok(());
        }
        let before = Self::stack(self.evaluation.stack_before(offset), offset)?;
        let (inputs, outputs) = self.marks.stack_move_words(offset, instruction, before)?;
        let sequence =
            stackmove::solve(&inputs, &outputs).ok_or(Error::UnsupportedStackMove {
                offset,
                mnemonic: instruction.mnemonic(),
            })?;
        if sequence.is_empty() {
            self.report.instructions_deleted += 1;
        }
        self.replace(offset, instruction, sequence);
        Ok(())
    }
}
