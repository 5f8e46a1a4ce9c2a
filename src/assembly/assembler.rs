//! Label-based bytecode assembler.
//!
//! [`InstructionAssembler`] builds a method body from a fluent sequence of instructions and
//! named labels. Branch and switch targets are resolved when the body is assembled, and
//! [`InstructionAssembler::finish`] also computes `max_stack` and the exception table.
//!
//! # Usage Examples
//!
//! ```rust
//! use classopt::{
//!     assembly::{opcodes::*, InstructionAssembler},
//!     classfile::{ComputationalType, ConstantPool},
//! };
//!
//! let mut asm = InstructionAssembler::new();
//! asm.load(ComputationalType::Int, 0)
//!     .branch(IFEQ, "zero")
//!     .iconst(1)
//!     .op(IRETURN)
//!     .label("zero")
//!     .iconst(0)
//!     .op(IRETURN);
//! let code = asm.finish(1, &ConstantPool::new())?;
//! assert_eq!(code.max_stack, 1);
//! assert_eq!(code.code.len(), 8);
//! # Ok::<(), classopt::Error>(())
//! ```

use rustc_hash::FxHashMap;

use crate::{
    assembly::{
        instruction::{Instruction, Operand},
        opcodes::*,
        StackSizeComputer,
    },
    classfile::{CodeAttribute, ComputationalType, ConstantPool, ExceptionHandler, LineNumber},
    Error, Result,
};

#[derive(Debug, Clone)]
enum Item {
    Plain(Instruction),
    Branch(u8, String),
    TableSwitch {
        low: i32,
        labels: Vec<String>,
        default: String,
    },
    LookupSwitch {
        pairs: Vec<(i32, String)>,
        default: String,
    },
}

impl Item {
    /// The instruction with every displacement set to zero, used for sizing.
    fn placeholder(&self) -> Instruction {
        match self {
            Item::Plain(instruction) => instruction.clone(),
            Item::Branch(opcode, _) => Instruction::branch(*opcode, 0),
            Item::TableSwitch { low, labels, .. } => Instruction::new(
                TABLESWITCH,
                Operand::TableSwitch {
                    default: 0,
                    low: *low,
                    high: low + labels.len() as i32 - 1,
                    offsets: vec![0; labels.len()],
                },
            ),
            Item::LookupSwitch { pairs, .. } => Instruction::new(
                LOOKUPSWITCH,
                Operand::LookupSwitch {
                    default: 0,
                    pairs: pairs.iter().map(|(key, _)| (*key, 0)).collect(),
                },
            ),
        }
    }
}

/// Fluent builder for method bodies.
#[derive(Debug, Default)]
pub struct InstructionAssembler {
    items: Vec<Item>,
    /// label name -> index of the item it precedes
    labels: FxHashMap<String, usize>,
    handlers: Vec<(String, String, String, u16)>,
    lines: Vec<(usize, u16)>,
    error: Option<Error>,
}

impl InstructionAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction.
    pub fn insn(&mut self, instruction: Instruction) -> &mut Self {
        self.items.push(Item::Plain(instruction));
        self
    }

    /// Appends an instruction without operand.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.insn(Instruction::simple(opcode))
    }

    /// Pushes an `int` that fits `sipush`, choosing the shortest form.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match Instruction::push_int(value) {
            Some(instruction) => self.insn(instruction),
            None => {
                self.error
                    .get_or_insert(malformed_error!("{} needs an ldc constant", value));
                self
            }
        }
    }

    /// Loads local `index` of `kind`.
    pub fn load(&mut self, kind: ComputationalType, index: u16) -> &mut Self {
        self.insn(Instruction::load(kind, index))
    }

    /// Stores into local `index` of `kind`.
    pub fn store(&mut self, kind: ComputationalType, index: u16) -> &mut Self {
        self.insn(Instruction::store(kind, index))
    }

    /// Increments local `index` by `delta`.
    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        self.insn(Instruction::new(IINC, Operand::Iinc { index, delta }))
    }

    /// Appends an instruction with a constant pool operand (`ldc`, field access, invocation,
    /// `new`, ...). `invokeinterface` gets its argument count from [`InstructionAssembler::finish`].
    pub fn constant(&mut self, opcode: u8, index: u16) -> &mut Self {
        if opcode == INVOKEINTERFACE {
            return self.insn(Instruction::new(
                opcode,
                Operand::InvokeInterface { index, count: 0 },
            ));
        }
        self.insn(Instruction::new(opcode, Operand::Constant(index)))
    }

    /// Appends a branch to `label`.
    pub fn branch(&mut self, opcode: u8, label: &str) -> &mut Self {
        self.items.push(Item::Branch(opcode, label.to_string()));
        self
    }

    /// Appends a `tableswitch` over `low..low + labels.len()`.
    pub fn table_switch(&mut self, low: i32, labels: &[&str], default: &str) -> &mut Self {
        self.items.push(Item::TableSwitch {
            low,
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            default: default.to_string(),
        });
        self
    }

    /// Appends a `lookupswitch`; `pairs` are sorted by key.
    pub fn lookup_switch(&mut self, pairs: &[(i32, &str)], default: &str) -> &mut Self {
        let mut pairs: Vec<_> = pairs.iter().map(|(k, l)| (*k, (*l).to_string())).collect();
        pairs.sort_by_key(|(k, _)| *k);
        self.items.push(Item::LookupSwitch {
            pairs,
            default: default.to_string(),
        });
        self
    }

    /// Defines `name` at the current position.
    pub fn label(&mut self, name: &str) -> &mut Self {
        if self.labels.insert(name.to_string(), self.items.len()).is_some() {
            self.error
                .get_or_insert(Error::DuplicateLabel(name.to_string()));
        }
        self
    }

    /// Starts source line `line` at the current position.
    pub fn line(&mut self, line: u16) -> &mut Self {
        self.lines.push((self.items.len(), line));
        self
    }

    /// Protects `start..end` with a handler at `handler` catching `catch_type` (0 for any).
    pub fn try_catch(&mut self, start: &str, end: &str, handler: &str, catch_type: u16) -> &mut Self {
        self.handlers.push((
            start.to_string(),
            end.to_string(),
            handler.to_string(),
            catch_type,
        ));
        self
    }

    /// Lays out the items, returning the offset of each item plus the total length.
    fn layout(&self) -> Vec<usize> {
        let mut positions = Vec::with_capacity(self.items.len() + 1);
        let mut position = 0;
        for item in &self.items {
            positions.push(position);
            position += item.placeholder().length(position);
        }
        positions.push(position);
        positions
    }

    /// Returns the offset a label resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] for unknown labels.
    pub fn label_offset(&self, name: &str) -> Result<usize> {
        let item = self
            .labels
            .get(name)
            .ok_or_else(|| Error::UndefinedLabel(name.to_string()))?;
        Ok(self.layout()[*item])
    }

    /// Assembles the bytecode.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded while building, an undefined label, or a branch
    /// displacement that does not fit its instruction.
    pub fn assemble(&self) -> Result<Vec<u8>> {
        if let Some(error) = &self.error {
            return Err(Error::Error(error.to_string()));
        }
        let positions = self.layout();
        let resolve = |label: &str, at: usize| -> Result<i32> {
            let item = self
                .labels
                .get(label)
                .ok_or_else(|| Error::UndefinedLabel(label.to_string()))?;
            Ok(positions[*item] as i32 - at as i32)
        };

        let mut code = Vec::with_capacity(positions[self.items.len()]);
        for (item, &position) in self.items.iter().zip(&positions) {
            let instruction = match item {
                Item::Plain(instruction) => instruction.clone(),
                Item::Branch(opcode, label) => {
                    Instruction::branch(*opcode, resolve(label, position)?)
                }
                Item::TableSwitch {
                    low,
                    labels,
                    default,
                } => Instruction::new(
                    TABLESWITCH,
                    Operand::TableSwitch {
                        default: resolve(default, position)?,
                        low: *low,
                        high: low + labels.len() as i32 - 1,
                        offsets: labels
                            .iter()
                            .map(|l| resolve(l, position))
                            .collect::<Result<_>>()?,
                    },
                ),
                Item::LookupSwitch { pairs, default } => Instruction::new(
                    LOOKUPSWITCH,
                    Operand::LookupSwitch {
                        default: resolve(default, position)?,
                        pairs: pairs
                            .iter()
                            .map(|(k, l)| Ok((*k, resolve(l, position)?)))
                            .collect::<Result<_>>()?,
                    },
                ),
            };
            instruction.encode(position, &mut code)?;
        }
        Ok(code)
    }

    /// Assembles a complete code attribute, computing `max_stack` against `pool`.
    ///
    /// # Errors
    ///
    /// See [`InstructionAssembler::assemble`]; also fails if the stack heights are inconsistent
    /// or `invokeinterface` references are invalid.
    pub fn finish(&mut self, max_locals: u16, pool: &ConstantPool) -> Result<CodeAttribute> {
        for item in &mut self.items {
            if let Item::Plain(instruction) = item {
                if let Operand::InvokeInterface { index, count: 0 } = instruction.operand {
                    let count = instruction.method_descriptor(pool)?.parameter_slots() + 1;
                    instruction.operand = Operand::InvokeInterface {
                        index,
                        count: count as u8,
                    };
                }
            }
        }

        let positions = self.layout();
        let at = |label: &str| -> Result<u32> {
            let item = self
                .labels
                .get(label)
                .ok_or_else(|| Error::UndefinedLabel(label.to_string()))?;
            Ok(positions[*item] as u32)
        };

        let mut code = CodeAttribute::new(0, max_locals, self.assemble()?);
        for (start, end, handler, catch_type) in &self.handlers {
            code.exception_table.push(ExceptionHandler {
                start_pc: at(start)?,
                end_pc: at(end)?,
                handler_pc: at(handler)?,
                catch_type: *catch_type,
            });
        }
        code.line_numbers = self
            .lines
            .iter()
            .map(|(item, line)| LineNumber {
                start_pc: positions[*item] as u32,
                line: *line,
            })
            .collect();
        code.max_stack = StackSizeComputer::compute(&code, pool)?;
        Ok(code)
    }
}
