//! Operand stack height analysis.
//!
//! [`StackSizeComputer`] propagates stack heights along all control flow edges of a method
//! body, starting from offset 0 with an empty stack and from every exception handler with the
//! caught exception on the stack. Heights must agree wherever paths merge.

use crate::{
    assembly::{decode_all, instruction::FlowType},
    classfile::{CodeAttribute, ConstantPool},
    Result,
};

/// Computes operand stack heights and the maximum stack size of a method body.
pub struct StackSizeComputer;

impl StackSizeComputer {
    /// Returns the stack height before every byte offset, `None` where no instruction starts
    /// or the instruction is unreachable.
    ///
    /// After a `jsr`, control is assumed to return with the height the `jsr` itself saw.
    ///
    /// # Errors
    ///
    /// Returns an error on undecodable code, stack underflow, inconsistent heights at a merge
    /// point, or branches that leave the method body.
    pub fn stack_heights(code: &CodeAttribute, pool: &ConstantPool) -> Result<Vec<Option<usize>>> {
        let instructions = decode_all(&code.code)?;
        let length = code.code.len();
        let mut index_of = vec![usize::MAX; length];
        for (index, (offset, _)) in instructions.iter().enumerate() {
            index_of[*offset] = index;
        }

        let mut heights: Vec<Option<usize>> = vec![None; length];
        let mut worklist: Vec<usize> = Vec::new();

        let reach =
            |offset: usize, height: usize, heights: &mut Vec<Option<usize>>, worklist: &mut Vec<usize>| -> Result<()> {
                if offset >= length || index_of[offset] == usize::MAX {
                    return Err(malformed_error!("Control flow reaches invalid offset {}", offset));
                }
                match heights[offset] {
                    Some(existing) if existing != height => Err(malformed_error!(
                        "Inconsistent stack height at {}: {} vs {}",
                        offset,
                        existing,
                        height
                    )),
                    Some(_) => Ok(()),
                    None => {
                        heights[offset] = Some(height);
                        worklist.push(offset);
                        Ok(())
                    }
                }
            };

        if length > 0 {
            reach(0, 0, &mut heights, &mut worklist)?;
        }
        for handler in &code.exception_table {
            reach(handler.handler_pc as usize, 1, &mut heights, &mut worklist)?;
        }

        while let Some(offset) = worklist.pop() {
            let (_, instruction) = &instructions[index_of[offset]];
            let before = heights[offset].unwrap_or(0);
            let effect = instruction.stack_effect(pool)?;
            if effect.pops > before {
                return Err(malformed_error!(
                    "Stack underflow at {}: {} pops {} with height {}",
                    offset,
                    instruction.mnemonic(),
                    effect.pops,
                    before
                ));
            }
            let after = before - effect.pops + effect.pushes;
            let next = offset + instruction.length(offset);

            match instruction.flow_type() {
                FlowType::Subroutine => {
                    for target in instruction.branch_targets(offset)? {
                        reach(target, after, &mut heights, &mut worklist)?;
                    }
                    if next < length {
                        reach(next, before, &mut heights, &mut worklist)?;
                    }
                }
                _ => {
                    for target in instruction.branch_targets(offset)? {
                        reach(target, after, &mut heights, &mut worklist)?;
                    }
                    if instruction.falls_through() {
                        reach(next, after, &mut heights, &mut worklist)?;
                    }
                }
            }
        }
        Ok(heights)
    }

    /// Returns the maximum operand stack size of `code`.
    ///
    /// # Errors
    ///
    /// See [`StackSizeComputer::stack_heights`].
    pub fn compute(code: &CodeAttribute, pool: &ConstantPool) -> Result<u16> {
        let instructions = decode_all(&code.code)?;
        let heights = Self::stack_heights(code, pool)?;
        let mut max = 0usize;
        for (offset, instruction) in &instructions {
            let Some(before) = heights[*offset] else {
                continue;
            };
            let effect = instruction.stack_effect(pool)?;
            max = max.max(before).max(before - effect.pops + effect.pushes);
        }
        u16::try_from(max).map_err(|_| malformed_error!("Stack size {} exceeds u16", max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    #[test]
    fn test_max_stack_of_straight_line_code() {
        let code = CodeAttribute::new(0, 0, vec![LCONST_1, LCONST_1, LADD, POP2, RETURN]);
        assert_eq!(
            StackSizeComputer::compute(&code, &ConstantPool::new()).unwrap(),
            4
        );
    }

    #[test]
    fn test_merge_mismatch_is_an_error() {
        // iconst_0; ifeq +4 (to 5, height 0); iconst_1; (5) return  -> 4 falls into 5 with 1
        let code = CodeAttribute::new(0, 0, vec![ICONST_0, IFEQ, 0, 4, ICONST_1, RETURN]);
        assert!(StackSizeComputer::stack_heights(&code, &ConstantPool::new()).is_err());
    }

    #[test]
    fn test_unreachable_code_has_no_height() {
        let code = CodeAttribute::new(0, 0, vec![RETURN, ICONST_0, IRETURN]);
        let heights = StackSizeComputer::stack_heights(&code, &ConstantPool::new()).unwrap();
        assert_eq!(heights[0], Some(0));
        assert_eq!(heights[1], None);
    }

    #[test]
    fn test_underflow_is_an_error() {
        let code = CodeAttribute::new(0, 0, vec![POP, RETURN]);
        assert!(StackSizeComputer::compute(&code, &ConstantPool::new()).is_err());
    }
}
