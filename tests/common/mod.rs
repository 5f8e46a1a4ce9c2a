//! A concrete interpreter for `int`/`long` method bodies, used to compare the behaviour of
//! original and optimized code.

#![allow(dead_code)]

use classopt::{
    assembly::{decode_all, opcodes::*, Instruction, LocalAccess, Operand, StackMove},
    classfile::{ClassPool, CodeAttribute, ComputationalType, Constant, ConstantPool},
};
use rustc_hash::FxHashMap;

/// One stack or variable word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    Int(i32),
    Long(i64),
    /// The other word of a `long`
    Half,
    /// Never written
    Unset,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<Word>),
    /// `ArithmeticException` from a division by zero
    Threw,
    /// The step budget ran out, e.g. in an infinite loop
    Diverged,
}

struct Machine<'a> {
    pool: &'a ConstantPool,
    instructions: FxHashMap<usize, Instruction>,
    stack: Vec<Word>,
    locals: Vec<Word>,
}

impl Machine<'_> {
    fn pop_int(&mut self) -> i32 {
        match self.stack.pop() {
            Some(Word::Int(v)) => v,
            other => panic!("expected int on the stack, found {other:?}"),
        }
    }

    fn pop_long(&mut self) -> i64 {
        let value = match self.stack.pop() {
            Some(Word::Long(v)) => v,
            other => panic!("expected long on the stack, found {other:?}"),
        };
        assert_eq!(self.stack.pop(), Some(Word::Half));
        value
    }

    fn push_long(&mut self, value: i64) {
        self.stack.push(Word::Half);
        self.stack.push(Word::Long(value));
    }

    /// Executes one instruction; returns the next offset or the outcome.
    fn step(&mut self, offset: usize) -> Result<usize, Outcome> {
        let instruction = self
            .instructions
            .get(&offset)
            .unwrap_or_else(|| panic!("no instruction at {offset}"))
            .clone();
        let next = offset + instruction.length(offset);
        let target = |displacement: i32| (offset as i64 + i64::from(displacement)) as usize;

        if let Some((access, kind, index)) = instruction.local_access() {
            let index = usize::from(index);
            match (access, kind) {
                (LocalAccess::Load, ComputationalType::Int) => match self.locals[index] {
                    Word::Int(v) => self.stack.push(Word::Int(v)),
                    other => panic!("iload of {other:?}"),
                },
                (LocalAccess::Load, ComputationalType::Long) => match self.locals[index] {
                    Word::Long(v) => self.push_long(v),
                    other => panic!("lload of {other:?}"),
                },
                (LocalAccess::Store, ComputationalType::Int) => {
                    self.locals[index] = Word::Int(self.pop_int());
                }
                (LocalAccess::Store, ComputationalType::Long) => {
                    self.locals[index] = Word::Long(self.pop_long());
                    self.locals[index + 1] = Word::Half;
                }
                _ => panic!("unsupported local access {instruction}"),
            }
            return Ok(next);
        }

        if let Some(movement) = StackMove::of(instruction.opcode) {
            let base = self.stack.len() - movement.pops;
            let inputs = self.stack.split_off(base);
            self.stack
                .extend(movement.outputs.iter().map(|&source| inputs[source]));
            return Ok(next);
        }

        match (instruction.opcode, &instruction.operand) {
            (NOP, _) => {}
            (ICONST_M1..=ICONST_5, _) => {
                self.stack
                    .push(Word::Int(i32::from(instruction.opcode) - i32::from(ICONST_0)));
            }
            (LCONST_0 | LCONST_1, _) => {
                self.push_long(i64::from(instruction.opcode - LCONST_0));
            }
            (BIPUSH, Operand::Byte(v)) => self.stack.push(Word::Int(i32::from(*v))),
            (SIPUSH, Operand::Short(v)) => self.stack.push(Word::Int(i32::from(*v))),
            (LDC | LDC_W | LDC2_W, Operand::Constant(index)) => match self.pool.get(*index) {
                Ok(Constant::Integer(v)) => self.stack.push(Word::Int(*v)),
                Ok(Constant::Long(v)) => self.push_long(*v),
                other => panic!("unsupported constant {other:?}"),
            },
            (IINC, Operand::Iinc { index, delta }) => {
                let index = usize::from(*index);
                match self.locals[index] {
                    Word::Int(v) => self.locals[index] = Word::Int(v.wrapping_add(i32::from(*delta))),
                    other => panic!("iinc of {other:?}"),
                }
            }
            (IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR, _) => {
                self.int_arithmetic(instruction.opcode)?;
            }
            (LADD | LSUB | LMUL | LAND | LOR | LXOR, _) => {
                let b = self.pop_long();
                let a = self.pop_long();
                self.push_long(match instruction.opcode {
                    LADD => a.wrapping_add(b),
                    LSUB => a.wrapping_sub(b),
                    LMUL => a.wrapping_mul(b),
                    LAND => a & b,
                    LOR => a | b,
                    _ => a ^ b,
                });
            }
            (INEG, _) => {
                let a = self.pop_int();
                self.stack.push(Word::Int(a.wrapping_neg()));
            }
            (I2L, _) => {
                let a = self.pop_int();
                self.push_long(i64::from(a));
            }
            (L2I, _) => {
                let a = self.pop_long();
                self.stack.push(Word::Int(a as i32));
            }
            (LCMP, _) => {
                let b = self.pop_long();
                let a = self.pop_long();
                self.stack.push(Word::Int(a.cmp(&b) as i32));
            }
            (IFEQ..=IFLE, Operand::Branch(d)) => {
                let a = self.pop_int();
                if Self::compare(instruction.opcode - IFEQ, a, 0) {
                    return Ok(target(*d));
                }
            }
            (IF_ICMPEQ..=IF_ICMPLE, Operand::Branch(d)) => {
                let b = self.pop_int();
                let a = self.pop_int();
                if Self::compare(instruction.opcode - IF_ICMPEQ, a, b) {
                    return Ok(target(*d));
                }
            }
            (GOTO | GOTO_W, Operand::Branch(d)) => return Ok(target(*d)),
            (
                TABLESWITCH,
                Operand::TableSwitch {
                    default,
                    low,
                    high,
                    offsets,
                },
            ) => {
                let key = self.pop_int();
                let displacement = if (*low..=*high).contains(&key) {
                    offsets[(key - low) as usize]
                } else {
                    *default
                };
                return Ok(target(displacement));
            }
            (LOOKUPSWITCH, Operand::LookupSwitch { default, pairs }) => {
                let key = self.pop_int();
                let displacement = pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map_or(*default, |(_, d)| *d);
                return Ok(target(displacement));
            }
            (IRETURN, _) => return Err(Outcome::Returned(Some(Word::Int(self.pop_int())))),
            (LRETURN, _) => return Err(Outcome::Returned(Some(Word::Long(self.pop_long())))),
            (RETURN, _) => return Err(Outcome::Returned(None)),
            _ => panic!("unsupported instruction {instruction} at {offset}"),
        }
        Ok(next)
    }

    fn int_arithmetic(&mut self, opcode: u8) -> Result<(), Outcome> {
        let b = self.pop_int();
        let a = self.pop_int();
        let result = match opcode {
            IADD => a.wrapping_add(b),
            ISUB => a.wrapping_sub(b),
            IMUL => a.wrapping_mul(b),
            IDIV | IREM if b == 0 => return Err(Outcome::Threw),
            IDIV => a.wrapping_div(b),
            IREM => a.wrapping_rem(b),
            ISHL => a.wrapping_shl(b as u32 & 31),
            ISHR => a.wrapping_shr(b as u32 & 31),
            IUSHR => ((a as u32) >> (b as u32 & 31)) as i32,
            IAND => a & b,
            IOR => a | b,
            IXOR => a ^ b,
            _ => panic!("unsupported int arithmetic {opcode:#04x}"),
        };
        self.stack.push(Word::Int(result));
        Ok(())
    }

    fn compare(condition: u8, a: i32, b: i32) -> bool {
        match condition {
            0 => a == b,
            1 => a != b,
            2 => a < b,
            3 => a >= b,
            4 => a > b,
            _ => a <= b,
        }
    }
}

/// Runs `code` with the given arguments in the first variable slots.
pub fn run(code: &CodeAttribute, pool: &ConstantPool, args: &[Word], max_steps: usize) -> Outcome {
    let instructions = decode_all(&code.code)
        .expect("decodable code")
        .into_iter()
        .collect();
    let mut locals = vec![Word::Unset; usize::from(code.max_locals).max(args.len())];
    locals[..args.len()].copy_from_slice(args);
    let mut machine = Machine {
        pool,
        instructions,
        stack: Vec::new(),
        locals,
    };

    let mut offset = 0;
    for _ in 0..max_steps {
        match machine.step(offset) {
            Ok(next) => offset = next,
            Err(outcome) => {
                if let Outcome::Returned(_) = outcome {
                    assert!(machine.stack.len() <= usize::from(code.max_stack));
                }
                return outcome;
            }
        }
        assert!(
            machine.stack.len() <= usize::from(code.max_stack),
            "stack exceeds max_stack {} at {offset}",
            code.max_stack
        );
    }
    Outcome::Diverged
}

/// Int arguments spanning small, boundary and sign-changing values.
pub fn sample_ints() -> Vec<i32> {
    vec![0, 1, -1, 2, 3, 5, 7, 10, 42, -17, 100, 1000, i32::MAX, i32::MIN]
}

/// Code of `class.name descriptor` in `pool`.
pub fn method_code<'a>(
    pool: &'a ClassPool,
    class: &str,
    name: &str,
    descriptor: &str,
) -> &'a CodeAttribute {
    pool.get(class)
        .and_then(|c| c.method(name, descriptor))
        .and_then(|m| m.code.as_ref())
        .expect("method with code")
}
