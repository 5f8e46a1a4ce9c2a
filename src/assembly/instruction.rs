//! JVM instruction representation, operands, control flow and stack behaviour.
//!
//! An [`Instruction`] is an opcode plus a typed [`Operand`]. Branch operands are kept as
//! displacements relative to the instruction's own offset, exactly as in the class file, so
//! an instruction is meaningful only together with the offset it is placed at. The `wide`
//! prefix is folded into the operand: [`Instruction::encode`] picks the short or the wide
//! form depending on the operand values, and likewise turns `ldc` into `ldc_w` when the
//! constant index needs two bytes.
//!
//! # Key Components
//!
//! - [`Instruction`] - a decoded instruction
//! - [`Operand`] - typed operand forms
//! - [`FlowType`] - control flow classification
//! - [`StackEffect`] - slots popped and pushed, resolved against a constant pool

use std::fmt;

use crate::{
    assembly::opcodes::{self, *},
    classfile::{ComputationalType, ConstantPool, FieldType, MethodDescriptor},
    Error, Result,
};

/// Operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// No operand
    None,
    /// `bipush` immediate
    Byte(i8),
    /// `sipush` immediate
    Short(i16),
    /// Local variable slot of a load, store or `ret`
    Local(u16),
    /// `iinc` slot and increment
    Iinc {
        /// Local variable slot
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// Constant pool index (`ldc` family, field and method references, type operands)
    Constant(u16),
    /// Branch displacement relative to the instruction offset
    Branch(i32),
    /// `newarray` primitive array type code
    ArrayType(u8),
    /// `invokeinterface` method reference and argument slot count
    InvokeInterface {
        /// Constant pool index of the `InterfaceMethodref`
        index: u16,
        /// Argument slots including the receiver
        count: u8,
    },
    /// `multianewarray` class index and dimensions
    MultiANewArray {
        /// Constant pool index of the array class
        index: u16,
        /// Number of dimensions to allocate
        dimensions: u8,
    },
    /// `tableswitch` displacements
    TableSwitch {
        /// Default displacement
        default: i32,
        /// Lowest case value
        low: i32,
        /// Highest case value
        high: i32,
        /// One displacement per case value in `low..=high`
        offsets: Vec<i32>,
    },
    /// `lookupswitch` displacements
    LookupSwitch {
        /// Default displacement
        default: i32,
        /// `(match, displacement)` pairs sorted by match value
        pairs: Vec<(i32, i32)>,
    },
}

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Continues with the next instruction
    Sequential,
    /// Branches or continues with the next instruction
    ConditionalBranch,
    /// `goto`, `goto_w`
    UnconditionalBranch,
    /// `jsr`, `jsr_w`
    Subroutine,
    /// `ret`
    SubroutineReturn,
    /// `tableswitch`, `lookupswitch`
    Switch,
    /// Any `return` form
    Return,
    /// `athrow`
    Throw,
}

/// Number of stack slots an instruction pops and pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Slots consumed
    pub pops: usize,
    /// Slots produced
    pub pushes: usize,
}

/// Word-level behaviour of `pop`, `pop2`, the `dup` family and `swap`.
///
/// The instruction removes the top `pops` words; `outputs` lists, bottom to top, which of the
/// removed words (indexed bottom to top) it pushes back. `boundaries` are the depths from the
/// top at which the JVM requires a category boundary, i.e. where the instruction must not cut
/// a `long` or `double` in half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMove {
    /// Words removed from the top of the stack
    pub pops: usize,
    /// Source word of every pushed word, bottom to top
    pub outputs: &'static [usize],
    /// Depths that must fall between two values
    pub boundaries: &'static [usize],
}

impl StackMove {
    /// Returns the stack move of `opcode`, if it is a stack manipulation instruction.
    #[must_use]
    pub fn of(opcode: u8) -> Option<StackMove> {
        let (pops, outputs, boundaries): (usize, &'static [usize], &'static [usize]) = match opcode
        {
            POP => (1, &[], &[1]),
            POP2 => (2, &[], &[2]),
            DUP => (1, &[0, 0], &[1]),
            DUP_X1 => (2, &[1, 0, 1], &[1, 2]),
            DUP_X2 => (3, &[2, 0, 1, 2], &[1, 3]),
            DUP2 => (2, &[0, 1, 0, 1], &[2]),
            DUP2_X1 => (3, &[1, 2, 0, 1, 2], &[2, 3]),
            DUP2_X2 => (4, &[2, 3, 0, 1, 2, 3], &[2, 4]),
            SWAP => (2, &[1, 0], &[1, 2]),
            _ => return None,
        };
        Some(StackMove {
            pops,
            outputs,
            boundaries,
        })
    }

    /// Checks the category boundaries against a word stack, bottom to top, where
    /// `upper_half(word)` tells whether a word is the upper half of a two-word value.
    #[must_use]
    pub fn fits<T>(&self, words: &[T], upper_half: impl Fn(&T) -> bool) -> bool {
        if words.len() < self.pops {
            return false;
        }
        self.boundaries
            .iter()
            .all(|&depth| depth >= words.len() || !upper_half(&words[words.len() - depth]))
    }
}

/// Whether an instruction reads or writes its local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAccess {
    /// `xload`
    Load,
    /// `xstore`
    Store,
}

const KINDS: [ComputationalType; 5] = [
    ComputationalType::Int,
    ComputationalType::Long,
    ComputationalType::Float,
    ComputationalType::Double,
    ComputationalType::Reference,
];

fn kind_offset(kind: ComputationalType) -> u8 {
    match kind {
        ComputationalType::Int => 0,
        ComputationalType::Long => 1,
        ComputationalType::Float => 2,
        ComputationalType::Double => 3,
        ComputationalType::Reference => 4,
    }
}

/// A decoded JVM instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Opcode byte, never `wide`
    pub opcode: u8,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction from an opcode and operand.
    #[must_use]
    pub fn new(opcode: u8, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// Creates an instruction without operand.
    #[must_use]
    pub fn simple(opcode: u8) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Creates a branch with a displacement relative to its own offset.
    #[must_use]
    pub fn branch(opcode: u8, displacement: i32) -> Self {
        Instruction {
            opcode,
            operand: Operand::Branch(displacement),
        }
    }

    /// Creates the shortest load of `kind` from slot `index`.
    #[must_use]
    pub fn load(kind: ComputationalType, index: u16) -> Self {
        Self::variable(ILOAD, ILOAD_0, kind, index)
    }

    /// Creates the shortest store of `kind` into slot `index`.
    #[must_use]
    pub fn store(kind: ComputationalType, index: u16) -> Self {
        Self::variable(ISTORE, ISTORE_0, kind, index)
    }

    fn variable(base: u8, short_base: u8, kind: ComputationalType, index: u16) -> Self {
        let offset = kind_offset(kind);
        if index < 4 {
            Instruction::simple(short_base + offset * 4 + index as u8)
        } else {
            Instruction::new(base + offset, Operand::Local(index))
        }
    }

    /// Creates the shortest instruction pushing `value` without a constant pool entry, if any.
    #[must_use]
    pub fn push_int(value: i32) -> Option<Self> {
        match value {
            -1..=5 => Some(Instruction::simple((i32::from(ICONST_0) + value) as u8)),
            v if i8::try_from(v).is_ok() => Some(Instruction::new(BIPUSH, Operand::Byte(v as i8))),
            v if i16::try_from(v).is_ok() => {
                Some(Instruction::new(SIPUSH, Operand::Short(v as i16)))
            }
            _ => None,
        }
    }

    /// Returns the mnemonic of the opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        opcodes::mnemonic(self.opcode).unwrap_or("<invalid>")
    }

    /// Returns the local variable this instruction loads or stores, with its type.
    ///
    /// `iinc` and `ret` are not included; see [`Instruction::local_index`].
    #[must_use]
    pub fn local_access(&self) -> Option<(LocalAccess, ComputationalType, u16)> {
        let op = self.opcode;
        let explicit = match self.operand {
            Operand::Local(index) => index,
            _ => 0,
        };
        match op {
            ILOAD..=ALOAD => Some((LocalAccess::Load, KINDS[(op - ILOAD) as usize], explicit)),
            ILOAD_0..=ALOAD_3 => {
                let n = op - ILOAD_0;
                Some((LocalAccess::Load, KINDS[(n / 4) as usize], u16::from(n % 4)))
            }
            ISTORE..=ASTORE => Some((LocalAccess::Store, KINDS[(op - ISTORE) as usize], explicit)),
            ISTORE_0..=ASTORE_3 => {
                let n = op - ISTORE_0;
                Some((LocalAccess::Store, KINDS[(n / 4) as usize], u16::from(n % 4)))
            }
            _ => None,
        }
    }

    /// Returns the local variable slot touched by a load, store, `iinc` or `ret`.
    #[must_use]
    pub fn local_index(&self) -> Option<u16> {
        match (&self.operand, self.opcode) {
            (Operand::Iinc { index, .. }, _) => Some(*index),
            (Operand::Local(index), RET) => Some(*index),
            _ => self.local_access().map(|(_, _, index)| index),
        }
    }

    /// Returns the constant pool index of the operand, if there is one.
    #[must_use]
    pub fn constant_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Constant(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::MultiANewArray { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Classifies the control flow of this instruction.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        match self.opcode {
            IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL => FlowType::ConditionalBranch,
            GOTO | GOTO_W => FlowType::UnconditionalBranch,
            JSR | JSR_W => FlowType::Subroutine,
            RET => FlowType::SubroutineReturn,
            TABLESWITCH | LOOKUPSWITCH => FlowType::Switch,
            IRETURN..=RETURN => FlowType::Return,
            ATHROW => FlowType::Throw,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` if control may continue with the next instruction.
    #[must_use]
    pub fn falls_through(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::Sequential | FlowType::ConditionalBranch
        )
    }

    /// Returns `true` for `pop`, `pop2`, the `dup` family and `swap`.
    #[must_use]
    pub fn is_stack_manipulation(&self) -> bool {
        matches!(self.opcode, POP..=SWAP)
    }

    /// Returns `true` for the `dup` family and `swap`.
    #[must_use]
    pub fn is_dup_or_swap(&self) -> bool {
        matches!(self.opcode, DUP..=SWAP)
    }

    /// Returns `true` for instructions that push a constant without side effects.
    #[must_use]
    pub fn is_constant_push(&self) -> bool {
        matches!(self.opcode, ACONST_NULL..=LDC2_W)
    }

    /// Absolute branch targets, excluding the fall-through successor.
    ///
    /// For switches the default target comes first, followed by the case targets in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if a displacement points before offset 0.
    pub fn branch_targets(&self, offset: usize) -> Result<Vec<usize>> {
        let absolute = |displacement: i32| -> Result<usize> {
            let target = offset as i64 + i64::from(displacement);
            usize::try_from(target).map_err(|_| Error::InvalidBranch {
                origin: offset,
                target,
            })
        };
        match &self.operand {
            Operand::Branch(displacement) => Ok(vec![absolute(*displacement)?]),
            Operand::TableSwitch {
                default, offsets, ..
            } => std::iter::once(default)
                .chain(offsets.iter())
                .map(|d| absolute(*d))
                .collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(default)
                .chain(pairs.iter().map(|(_, d)| d))
                .map(|d| absolute(*d))
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Returns the instruction with every branch displacement replaced through `map`.
    #[must_use]
    pub fn map_displacements(&self, mut map: impl FnMut(i32) -> i32) -> Instruction {
        let operand = match &self.operand {
            Operand::Branch(d) => Operand::Branch(map(*d)),
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            } => Operand::TableSwitch {
                default: map(*default),
                low: *low,
                high: *high,
                offsets: offsets.iter().map(|d| map(*d)).collect(),
            },
            Operand::LookupSwitch { default, pairs } => Operand::LookupSwitch {
                default: map(*default),
                pairs: pairs.iter().map(|(k, d)| (*k, map(*d))).collect(),
            },
            other => other.clone(),
        };
        Instruction::new(self.opcode, operand)
    }

    fn switch_padding(offset: usize) -> usize {
        (4 - (offset + 1) % 4) % 4
    }

    fn needs_wide(&self) -> bool {
        match self.operand {
            Operand::Local(index) => index > 255,
            Operand::Iinc { index, delta } => index > 255 || i8::try_from(delta).is_err(),
            _ => false,
        }
    }

    /// Encoded length in bytes when placed at `offset`.
    #[must_use]
    pub fn length(&self, offset: usize) -> usize {
        let wide = usize::from(self.needs_wide());
        match &self.operand {
            Operand::None => 1,
            Operand::Byte(_) | Operand::ArrayType(_) => 2,
            Operand::Short(_) => 3,
            Operand::Local(_) => 2 + wide * 2,
            Operand::Iinc { .. } => 3 + wide * 3,
            Operand::Constant(index) => match self.opcode {
                LDC if *index <= 255 => 2,
                INVOKEDYNAMIC => 5,
                _ => 3,
            },
            Operand::Branch(_) => match self.opcode {
                GOTO_W | JSR_W => 5,
                _ => 3,
            },
            Operand::InvokeInterface { .. } => 5,
            Operand::MultiANewArray { .. } => 4,
            Operand::TableSwitch { offsets, .. } => {
                1 + Self::switch_padding(offset) + 12 + 4 * offsets.len()
            }
            Operand::LookupSwitch { pairs, .. } => {
                1 + Self::switch_padding(offset) + 8 + 8 * pairs.len()
            }
        }
    }

    /// Appends the encoding of this instruction, placed at `offset`, to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BranchOffsetOverflow`] if a 16-bit branch displacement does not fit.
    pub fn encode(&self, offset: usize, out: &mut Vec<u8>) -> Result<()> {
        let wide = self.needs_wide();
        match &self.operand {
            Operand::None => out.push(self.opcode),
            Operand::Byte(value) => out.extend([self.opcode, *value as u8]),
            Operand::Short(value) => {
                out.push(self.opcode);
                out.extend(value.to_be_bytes());
            }
            Operand::Local(index) => {
                if wide {
                    out.extend([WIDE, self.opcode]);
                    out.extend(index.to_be_bytes());
                } else {
                    out.extend([self.opcode, *index as u8]);
                }
            }
            Operand::Iinc { index, delta } => {
                if wide {
                    out.extend([WIDE, IINC]);
                    out.extend(index.to_be_bytes());
                    out.extend(delta.to_be_bytes());
                } else {
                    out.extend([IINC, *index as u8, *delta as i8 as u8]);
                }
            }
            Operand::Constant(index) => match self.opcode {
                LDC if *index <= 255 => out.extend([LDC, *index as u8]),
                LDC => {
                    out.push(LDC_W);
                    out.extend(index.to_be_bytes());
                }
                INVOKEDYNAMIC => {
                    out.push(INVOKEDYNAMIC);
                    out.extend(index.to_be_bytes());
                    out.extend([0, 0]);
                }
                _ => {
                    out.push(self.opcode);
                    out.extend(index.to_be_bytes());
                }
            },
            Operand::Branch(displacement) => {
                out.push(self.opcode);
                if matches!(self.opcode, GOTO_W | JSR_W) {
                    out.extend(displacement.to_be_bytes());
                } else {
                    let short = i16::try_from(*displacement).map_err(|_| {
                        Error::BranchOffsetOverflow {
                            offset,
                            displacement: i64::from(*displacement),
                        }
                    })?;
                    out.extend(short.to_be_bytes());
                }
            }
            Operand::ArrayType(atype) => out.extend([self.opcode, *atype]),
            Operand::InvokeInterface { index, count } => {
                out.push(self.opcode);
                out.extend(index.to_be_bytes());
                out.extend([*count, 0]);
            }
            Operand::MultiANewArray { index, dimensions } => {
                out.push(self.opcode);
                out.extend(index.to_be_bytes());
                out.push(*dimensions);
            }
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            } => {
                out.push(self.opcode);
                out.extend(std::iter::repeat(0).take(Self::switch_padding(offset)));
                for value in [*default, *low, *high].iter().chain(offsets.iter()) {
                    out.extend(value.to_be_bytes());
                }
            }
            Operand::LookupSwitch { default, pairs } => {
                out.push(self.opcode);
                out.extend(std::iter::repeat(0).take(Self::switch_padding(offset)));
                out.extend(default.to_be_bytes());
                out.extend((pairs.len() as i32).to_be_bytes());
                for (key, displacement) in pairs {
                    out.extend(key.to_be_bytes());
                    out.extend(displacement.to_be_bytes());
                }
            }
        }
        Ok(())
    }

    /// Resolves the number of stack slots this instruction pops and pushes.
    ///
    /// Field accesses and invocations consult `pool` for their descriptors. `athrow` is
    /// reported as popping its operand only; the rest of the stack is discarded by the
    /// transfer to a handler.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced constant or descriptor is invalid.
    pub fn stack_effect(&self, pool: &ConstantPool) -> Result<StackEffect> {
        let effect = |pops, pushes| Ok(StackEffect { pops, pushes });
        match self.opcode {
            NOP | IINC | GOTO | GOTO_W | RET | RETURN => effect(0, 0),
            ACONST_NULL..=ICONST_5 | FCONST_0..=FCONST_2 | BIPUSH | SIPUSH => effect(0, 1),
            LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 | LDC2_W => effect(0, 2),
            LDC | LDC_W => effect(0, 1),
            ILOAD | FLOAD | ALOAD | ILOAD_0..=ILOAD_3 | FLOAD_0..=FLOAD_3 | ALOAD_0..=ALOAD_3 => {
                effect(0, 1)
            }
            LLOAD | DLOAD | LLOAD_0..=LLOAD_3 | DLOAD_0..=DLOAD_3 => effect(0, 2),
            LALOAD | DALOAD => effect(2, 2),
            IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => effect(2, 1),
            ISTORE | FSTORE | ASTORE | ISTORE_0..=ISTORE_3 | FSTORE_0..=FSTORE_3
            | ASTORE_0..=ASTORE_3 => effect(1, 0),
            LSTORE | DSTORE | LSTORE_0..=LSTORE_3 | DSTORE_0..=DSTORE_3 => effect(2, 0),
            LASTORE | DASTORE => effect(4, 0),
            IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => effect(3, 0),
            POP => effect(1, 0),
            POP2 => effect(2, 0),
            DUP => effect(1, 2),
            DUP_X1 => effect(2, 3),
            DUP_X2 => effect(3, 4),
            DUP2 => effect(2, 4),
            DUP2_X1 => effect(3, 5),
            DUP2_X2 => effect(4, 6),
            SWAP => effect(2, 2),
            IADD | FADD | ISUB | FSUB | IMUL | FMUL | IDIV | FDIV | IREM | FREM | ISHL | ISHR
            | IUSHR | IAND | IOR | IXOR => effect(2, 1),
            LADD | DADD | LSUB | DSUB | LMUL | DMUL | LDIV | DDIV | LREM | DREM | LAND | LOR
            | LXOR => effect(4, 2),
            LSHL | LSHR | LUSHR => effect(3, 2),
            INEG | FNEG => effect(1, 1),
            LNEG | DNEG => effect(2, 2),
            I2L | I2D | F2L | F2D => effect(1, 2),
            I2F | F2I | I2B | I2C | I2S => effect(1, 1),
            L2I | L2F | D2I | D2F => effect(2, 1),
            L2D | D2L => effect(2, 2),
            LCMP | DCMPL | DCMPG => effect(4, 1),
            FCMPL | FCMPG => effect(2, 1),
            IFEQ..=IFLE | IFNULL | IFNONNULL => effect(1, 0),
            IF_ICMPEQ..=IF_ACMPNE => effect(2, 0),
            JSR | JSR_W => effect(0, 1),
            TABLESWITCH | LOOKUPSWITCH => effect(1, 0),
            IRETURN | FRETURN | ARETURN => effect(1, 0),
            LRETURN | DRETURN => effect(2, 0),
            GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
                let size = self.field_type(pool)?.size();
                match self.opcode {
                    GETSTATIC => effect(0, size),
                    PUTSTATIC => effect(size, 0),
                    GETFIELD => effect(1, size),
                    _ => effect(1 + size, 0),
                }
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC => {
                let descriptor = self.method_descriptor(pool)?;
                let receiver = usize::from(!matches!(self.opcode, INVOKESTATIC | INVOKEDYNAMIC));
                effect(
                    descriptor.parameter_slots() + receiver,
                    descriptor.return_slots(),
                )
            }
            NEW => effect(0, 1),
            NEWARRAY | ANEWARRAY | ARRAYLENGTH | CHECKCAST | INSTANCEOF => effect(1, 1),
            ATHROW | MONITORENTER | MONITOREXIT => effect(1, 0),
            MULTIANEWARRAY => match self.operand {
                Operand::MultiANewArray { dimensions, .. } => effect(usize::from(dimensions), 1),
                _ => Err(malformed_error!("multianewarray without dimensions")),
            },
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    /// Parses the field type referenced by a field instruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand is not a valid field reference.
    pub fn field_type(&self, pool: &ConstantPool) -> Result<FieldType> {
        let index = self
            .constant_index()
            .ok_or_else(|| malformed_error!("{} without constant operand", self.mnemonic()))?;
        FieldType::parse(&pool.member_ref(index)?.descriptor)
    }

    /// Parses the method descriptor referenced by an invocation instruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand is not a valid method reference or call site.
    pub fn method_descriptor(&self, pool: &ConstantPool) -> Result<MethodDescriptor> {
        let index = self
            .constant_index()
            .ok_or_else(|| malformed_error!("{} without constant operand", self.mnemonic()))?;
        if self.opcode == INVOKEDYNAMIC {
            MethodDescriptor::parse(pool.invoke_dynamic_descriptor(index)?)
        } else {
            MethodDescriptor::parse(&pool.member_ref(index)?.descriptor)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Byte(v) => write!(f, " {v}"),
            Operand::Short(v) => write!(f, " {v}"),
            Operand::Local(index) => write!(f, " {index}"),
            Operand::Iinc { index, delta } => write!(f, " {index} {delta}"),
            Operand::Constant(index) => write!(f, " #{index}"),
            Operand::Branch(d) => write!(f, " {d:+}"),
            Operand::ArrayType(t) => write!(f, " {t}"),
            Operand::InvokeInterface { index, count } => write!(f, " #{index} {count}"),
            Operand::MultiANewArray { index, dimensions } => write!(f, " #{index} {dimensions}"),
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            } => write!(f, " {low}..={high} {offsets:?} default {default:+}"),
            Operand::LookupSwitch { default, pairs } => {
                write!(f, " {pairs:?} default {default:+}")
            }
        }
    }
}
