//! Atomic editing of method bodies.
//!
//! [`CodeAttributeEditor`] collects edits keyed by the original instruction offsets and
//! applies them all at once, producing a new [`CodeAttribute`]. Nothing is visible until
//! [`CodeAttributeEditor::apply`] succeeds, and a failed apply leaves the input untouched.
//!
//! # Edit Semantics
//!
//! For each original instruction the output contains, in order: the instructions inserted
//! before it, its replacement (or the instruction itself, or nothing if deleted), and the
//! instructions inserted after it.
//!
//! Branch displacements of every instruction in an edit are interpreted relative to the
//! original offset of the instruction the edit is attached to, so a replacement can branch
//! anywhere in the original code as if it sat at the original position. A branch to an
//! original offset lands on the first instruction emitted for that offset, i.e. on its
//! inserted-before code. The same mapping moves exception ranges, handlers, line numbers and
//! local variable ranges; ranges that become empty are dropped.
//!
//! `goto`/`jsr` are widened to `goto_w`/`jsr_w` when their displacement outgrows 16 bits,
//! and `goto_w`/`jsr_w` are narrowed when they fit. A conditional branch that no longer fits
//! fails the whole apply with [`crate::Error::BranchOffsetOverflow`].
//!
//! # Usage Examples
//!
//! ```rust
//! use classopt::{
//!     assembly::{opcodes::*, CodeAttributeEditor, Instruction},
//!     classfile::{CodeAttribute, ConstantPool},
//! };
//!
//! // iconst_1, iconst_2, iadd, ireturn
//! let code = CodeAttribute::new(2, 0, vec![ICONST_1, ICONST_2, IADD, IRETURN]);
//! let mut editor = CodeAttributeEditor::new(code.code.len());
//! editor.replace(0, vec![Instruction::simple(ICONST_3)]);
//! editor.delete(1);
//! editor.delete(2);
//!
//! let edited = editor.apply(&code, &ConstantPool::new())?;
//! assert_eq!(edited.code, vec![ICONST_3, IRETURN]);
//! assert_eq!(edited.max_stack, 1);
//! # Ok::<(), classopt::Error>(())
//! ```

use rustc_hash::FxHashMap;

use crate::{
    assembly::{decode_all, instruction::Instruction, opcodes::*, StackSizeComputer},
    classfile::{CodeAttribute, ConstantPool, ExceptionHandler, LineNumber, LocalVariable},
    Error, Result,
};

/// One instruction of the edited output.
struct Emitted {
    /// Original offset the instruction's displacements are relative to
    origin: usize,
    instruction: Instruction,
}

/// Accumulates edits to one method body.
#[derive(Debug, Default, Clone)]
pub struct CodeAttributeEditor {
    code_length: usize,
    before: FxHashMap<usize, Vec<Instruction>>,
    replacements: FxHashMap<usize, Vec<Instruction>>,
    after: FxHashMap<usize, Vec<Instruction>>,
    removed_handlers: Vec<usize>,
}

impl CodeAttributeEditor {
    /// Creates an editor for a method body of `code_length` bytes.
    #[must_use]
    pub fn new(code_length: usize) -> Self {
        CodeAttributeEditor {
            code_length,
            ..Default::default()
        }
    }

    /// Discards all edits and retargets the editor to a body of `code_length` bytes.
    pub fn reset(&mut self, code_length: usize) {
        *self = Self::new(code_length);
    }

    /// Returns `true` if any edit has been recorded.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        !self.before.is_empty()
            || !self.replacements.is_empty()
            || !self.after.is_empty()
            || !self.removed_handlers.is_empty()
    }

    /// Appends `instructions` to the code inserted before the instruction at `offset`.
    pub fn insert_before(&mut self, offset: usize, instructions: Vec<Instruction>) {
        if !instructions.is_empty() {
            self.before.entry(offset).or_default().extend(instructions);
        }
    }

    /// Appends `instructions` to the code inserted after the instruction at `offset`.
    pub fn insert_after(&mut self, offset: usize, instructions: Vec<Instruction>) {
        if !instructions.is_empty() {
            self.after.entry(offset).or_default().extend(instructions);
        }
    }

    /// Replaces the instruction at `offset` by `instructions`; an empty sequence deletes it.
    pub fn replace(&mut self, offset: usize, instructions: Vec<Instruction>) {
        self.replacements.insert(offset, instructions);
    }

    /// Deletes the instruction at `offset`.
    pub fn delete(&mut self, offset: usize) {
        self.replace(offset, Vec::new());
    }

    /// Returns `true` if the instruction at `offset` is replaced or deleted.
    #[must_use]
    pub fn is_replaced(&self, offset: usize) -> bool {
        self.replacements.contains_key(&offset)
    }

    /// Removes entry `index` of the exception table.
    pub fn remove_exception_handler(&mut self, index: usize) {
        if !self.removed_handlers.contains(&index) {
            self.removed_handlers.push(index);
        }
    }

    /// Applies all edits to `code`, returning the new body with `max_stack` recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if the editor was created for a different body length, an edit is
    /// attached to an offset that is not an instruction boundary, a branch leaves the body,
    /// a conditional branch overflows, or the result has inconsistent stack heights.
    pub fn apply(&self, code: &CodeAttribute, pool: &ConstantPool) -> Result<CodeAttribute> {
        if code.code.len() != self.code_length {
            return Err(malformed_error!(
                "Editor prepared for {} bytes applied to {} bytes",
                self.code_length,
                code.code.len()
            ));
        }
        let instructions = decode_all(&code.code)?;
        let length = code.code.len();

        let mut boundary = vec![false; length + 1];
        boundary[length] = true;
        for (offset, _) in &instructions {
            boundary[*offset] = true;
        }
        for offset in self
            .before
            .keys()
            .chain(self.replacements.keys())
            .chain(self.after.keys())
        {
            if *offset >= length || !boundary[*offset] {
                return Err(malformed_error!(
                    "Edit at {} is not on an instruction boundary",
                    offset
                ));
            }
        }

        // Emit the new instruction sequence; `first_item[o]` is the index of the first item
        // emitted for original offset `o`, or of the next item if nothing was emitted.
        let mut items: Vec<Emitted> = Vec::with_capacity(instructions.len());
        let mut first_item = vec![0usize; length + 1];
        for (offset, instruction) in &instructions {
            first_item[*offset] = items.len();
            let emit = |items: &mut Vec<Emitted>, instruction: &Instruction| -> Result<()> {
                for target in instruction.branch_targets(*offset)? {
                    if target >= length || !boundary[target] {
                        return Err(Error::InvalidBranch {
                            origin: *offset,
                            target: target as i64,
                        });
                    }
                }
                items.push(Emitted {
                    origin: *offset,
                    instruction: narrowed(instruction),
                });
                Ok(())
            };
            for inserted in self.before.get(offset).into_iter().flatten() {
                emit(&mut items, inserted)?;
            }
            match self.replacements.get(offset) {
                Some(replacement) => {
                    for replaced in replacement {
                        emit(&mut items, replaced)?;
                    }
                }
                None => emit(&mut items, instruction)?,
            }
            for inserted in self.after.get(offset).into_iter().flatten() {
                emit(&mut items, inserted)?;
            }
        }
        first_item[length] = items.len();

        let positions = layout(&mut items, &first_item)?;
        let new_offset = |original: usize| positions[first_item[original]];

        let mut bytes = Vec::with_capacity(positions[items.len()]);
        for (item, &position) in items.iter().zip(&positions) {
            let instruction = item.instruction.map_displacements(|displacement| {
                let target = (item.origin as i64 + i64::from(displacement)) as usize;
                new_offset(target) as i32 - position as i32
            });
            instruction.encode(position, &mut bytes)?;
        }
        let new_length = bytes.len();

        let mut edited = CodeAttribute::new(code.max_stack, code.max_locals, bytes);
        edited.exception_table = code
            .exception_table
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.removed_handlers.contains(index))
            .filter_map(|(_, handler)| {
                let start = new_offset(clamp(handler.start_pc, length, &boundary)?);
                let end = new_offset(clamp(handler.end_pc, length, &boundary)?);
                let target = new_offset(clamp(handler.handler_pc, length, &boundary)?);
                (start < end && target < new_length).then_some(ExceptionHandler {
                    start_pc: start as u32,
                    end_pc: end as u32,
                    handler_pc: target as u32,
                    catch_type: handler.catch_type,
                })
            })
            .collect();
        edited.line_numbers = code
            .line_numbers
            .iter()
            .filter_map(|line| {
                let start = new_offset(clamp(line.start_pc, length, &boundary)?);
                (start < new_length).then_some(LineNumber {
                    start_pc: start as u32,
                    line: line.line,
                })
            })
            .collect();
        edited.local_variables = code
            .local_variables
            .iter()
            .filter_map(|variable| {
                let start = new_offset(clamp(variable.start_pc, length, &boundary)?);
                let end = new_offset(clamp(
                    variable.start_pc.saturating_add(variable.length),
                    length,
                    &boundary,
                )?);
                (start < end).then_some(LocalVariable {
                    start_pc: start as u32,
                    length: (end - start) as u32,
                    ..variable.clone()
                })
            })
            .collect();

        edited.max_stack = StackSizeComputer::compute(&edited, pool)?;
        Ok(edited)
    }
}

/// Maps a table offset to an instruction boundary, `None` if it is not one.
fn clamp(offset: u32, length: usize, boundary: &[bool]) -> Option<usize> {
    let offset = (offset as usize).min(length);
    boundary[offset].then_some(offset)
}

fn narrowed(instruction: &Instruction) -> Instruction {
    match instruction.opcode {
        GOTO_W => Instruction::new(GOTO, instruction.operand.clone()),
        JSR_W => Instruction::new(JSR, instruction.operand.clone()),
        _ => instruction.clone(),
    }
}

/// Assigns positions to `items`, widening unconditional branches until every displacement
/// fits. Returns one position per item plus the total length.
fn layout(items: &mut [Emitted], first_item: &[usize]) -> Result<Vec<usize>> {
    loop {
        let mut positions = Vec::with_capacity(items.len() + 1);
        let mut position = 0usize;
        for item in items.iter() {
            positions.push(position);
            position += item.instruction.length(position);
        }
        positions.push(position);

        let mut widened = false;
        for (index, item) in items.iter_mut().enumerate() {
            let opcode = item.instruction.opcode;
            if matches!(opcode, GOTO_W | JSR_W | TABLESWITCH | LOOKUPSWITCH) {
                continue;
            }
            for target in item.instruction.branch_targets(item.origin)? {
                let displacement = positions[first_item[target]] as i64 - positions[index] as i64;
                if i16::try_from(displacement).is_ok() {
                    continue;
                }
                match opcode {
                    GOTO => item.instruction.opcode = GOTO_W,
                    JSR => item.instruction.opcode = JSR_W,
                    _ => {
                        return Err(Error::BranchOffsetOverflow {
                            offset: positions[index],
                            displacement,
                        })
                    }
                }
                widened = true;
            }
        }
        if !widened {
            return Ok(positions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::InstructionAssembler, classfile::ComputationalType};

    #[test]
    fn test_branches_follow_moved_instructions() {
        // 0: iload_0  1: ifeq -> 7  4: iconst_1  5: ireturn  6: nop  7: iconst_0  8: ireturn
        let mut asm = InstructionAssembler::new();
        asm.load(ComputationalType::Int, 0)
            .branch(IFEQ, "zero")
            .iconst(1)
            .op(IRETURN)
            .op(NOP)
            .label("zero")
            .iconst(0)
            .op(IRETURN);
        let code = asm.finish(1, &ConstantPool::new()).unwrap();

        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.delete(6);
        editor.insert_before(4, vec![Instruction::simple(NOP), Instruction::simple(NOP)]);
        let edited = editor.apply(&code, &ConstantPool::new()).unwrap();

        let instructions = decode_all(&edited.code).unwrap();
        assert_eq!(instructions.len(), 8);
        assert_eq!(instructions[1].1.branch_targets(1).unwrap(), vec![8]);
        assert_eq!(instructions[6].1, Instruction::simple(ICONST_0));
        assert_eq!(instructions[6].0, 8);
    }

    #[test]
    fn test_branch_to_deleted_instruction_lands_on_successor() {
        // 0: goto -> 3  3: nop  4: return
        let code = CodeAttribute::new(0, 0, vec![GOTO, 0, 3, NOP, RETURN]);
        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.delete(3);
        let edited = editor.apply(&code, &ConstantPool::new()).unwrap();
        assert_eq!(edited.code, vec![GOTO, 0, 3, RETURN]);
    }

    #[test]
    fn test_replacement_branches_relative_to_original_offset() {
        // 0: iconst_0  1: ifeq -> 6  4: nop  5: nop  6: return
        let code = CodeAttribute::new(1, 0, vec![ICONST_0, IFEQ, 0, 5, NOP, NOP, RETURN]);
        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.delete(0);
        editor.replace(1, vec![Instruction::branch(GOTO, 5)]);
        editor.delete(4);
        let edited = editor.apply(&code, &ConstantPool::new()).unwrap();
        assert_eq!(edited.code, vec![GOTO, 0, 4, NOP, RETURN]);
        assert_eq!(edited.max_stack, 0);
    }

    #[test]
    fn test_exception_ranges_shrink_and_vanish() {
        let mut asm = InstructionAssembler::new();
        asm.label("s1")
            .op(NOP)
            .label("e1")
            .label("s2")
            .op(NOP)
            .op(NOP)
            .label("e2")
            .op(RETURN)
            .label("h")
            .op(ATHROW)
            .try_catch("s1", "e1", "h", 0)
            .try_catch("s2", "e2", "h", 0);
        let code = asm.finish(0, &ConstantPool::new()).unwrap();

        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.delete(0);
        editor.delete(1);
        let edited = editor.apply(&code, &ConstantPool::new()).unwrap();

        assert_eq!(
            edited.exception_table,
            vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 2,
                catch_type: 0
            }]
        );
    }

    #[test]
    fn test_goto_is_widened_when_far() {
        // 0: goto -> 4  3: return  4: goto -> 3
        let code = CodeAttribute::new(0, 0, vec![GOTO, 0, 4, RETURN, GOTO, 0xFF, 0xFF]);
        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.insert_after(3, vec![Instruction::simple(NOP); 40_000]);
        let edited = editor.apply(&code, &ConstantPool::new()).unwrap();

        assert_eq!(edited.code[0], GOTO_W);
        let instructions = decode_all(&edited.code).unwrap();
        let last = instructions.last().unwrap();
        assert_eq!(last.1.opcode, GOTO_W);
        assert_eq!(last.1.branch_targets(last.0).unwrap(), vec![5]);
    }

    #[test]
    fn test_conditional_overflow_fails_atomically() {
        let code = CodeAttribute::new(1, 0, vec![ICONST_0, IFEQ, 0, 4, NOP, RETURN]);
        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.insert_after(4, vec![Instruction::simple(NOP); 40_000]);
        assert!(matches!(
            editor.apply(&code, &ConstantPool::new()),
            Err(Error::BranchOffsetOverflow { .. })
        ));
    }

    #[test]
    fn test_removed_handler_is_dropped() {
        let mut code = CodeAttribute::new(1, 0, vec![NOP, RETURN, ATHROW]);
        code.exception_table.push(ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 2,
            catch_type: 0,
        });
        let mut editor = CodeAttributeEditor::new(code.code.len());
        editor.remove_exception_handler(0);
        let edited = editor.apply(&code, &ConstantPool::new()).unwrap();
        assert!(edited.exception_table.is_empty());
    }
}
