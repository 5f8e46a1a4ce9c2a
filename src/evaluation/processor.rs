//! Symbolic execution of single instructions.
//!
//! [`Processor::execute`] applies one instruction to a traced variable frame and operand
//! stack and reports the successors control may flow to. Arithmetic on particular values
//! follows JVM semantics exactly: wrapping integer arithmetic, shift distances masked to 5 or
//! 6 bits, saturating float-to-integer conversions and NaN-aware float comparisons. Division
//! and remainder by a zero divisor are left unevaluated since they throw at run time.

use crate::{
    assembly::{opcodes::*, Instruction, LocalAccess, Operand, StackMove},
    classfile::{ComputationalType, Constant, ConstantPool, FieldType},
    evaluation::{
        Abstract, InvocationUnit, OffsetSet, OriginSet, ReferenceValue, Slot, Symbol,
        TracedStack, TracedVariables, Value, ValueFactory,
    },
    Result,
};

/// Something the evaluator records beyond the new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// An `<init>` invocation on a receiver with this identity
    Initialization(Option<Symbol>),
    /// A `jsr` to `target` that returns to `return_offset`
    SubroutineCall { target: usize, return_offset: usize },
    /// A `ret` to the given return offsets
    SubroutineReturn(OffsetSet),
}

/// Outcome of executing one instruction.
#[derive(Debug, Clone, Default)]
pub(crate) struct Step {
    /// Offsets control continues at, handlers excluded
    pub successors: Vec<usize>,
    /// Side information for the evaluation record
    pub event: Option<Event>,
}

/// Executes instructions over abstract state.
pub(crate) struct Processor<'a> {
    pub pool: &'a ConstantPool,
    pub factory: ValueFactory,
    pub unit: &'a dyn InvocationUnit,
}

fn fold_int(opcode: u8, a: i32, b: i32) -> Option<i32> {
    Some(match opcode {
        IADD => a.wrapping_add(b),
        ISUB => a.wrapping_sub(b),
        IMUL => a.wrapping_mul(b),
        IDIV if b != 0 => a.wrapping_div(b),
        IREM if b != 0 => a.wrapping_rem(b),
        ISHL => a.wrapping_shl(b as u32 & 0x1F),
        ISHR => a.wrapping_shr(b as u32 & 0x1F),
        IUSHR => ((a as u32) >> (b as u32 & 0x1F)) as i32,
        IAND => a & b,
        IOR => a | b,
        IXOR => a ^ b,
        _ => return None,
    })
}

fn fold_long(opcode: u8, a: i64, b: i64) -> Option<i64> {
    Some(match opcode {
        LADD => a.wrapping_add(b),
        LSUB => a.wrapping_sub(b),
        LMUL => a.wrapping_mul(b),
        LDIV if b != 0 => a.wrapping_div(b),
        LREM if b != 0 => a.wrapping_rem(b),
        LAND => a & b,
        LOR => a | b,
        LXOR => a ^ b,
        _ => return None,
    })
}

fn fold_long_shift(opcode: u8, a: i64, distance: i32) -> i64 {
    let distance = distance as u32 & 0x3F;
    match opcode {
        LSHL => a.wrapping_shl(distance),
        LSHR => a.wrapping_shr(distance),
        _ => ((a as u64) >> distance) as i64,
    }
}

fn fold_float(opcode: u8, a: f32, b: f32) -> f32 {
    match opcode {
        FADD => a + b,
        FSUB => a - b,
        FMUL => a * b,
        FDIV => a / b,
        _ => a % b,
    }
}

fn fold_double(opcode: u8, a: f64, b: f64) -> f64 {
    match opcode {
        DADD => a + b,
        DSUB => a - b,
        DMUL => a * b,
        DDIV => a / b,
        _ => a % b,
    }
}

/// `fcmpl`/`dcmpl` answer -1 for NaN operands, `fcmpg`/`dcmpg` answer 1.
fn compare_floats(a: f64, b: f64, nan_result: i32) -> i32 {
    if a.is_nan() || b.is_nan() {
        nan_result
    } else if a < b {
        -1
    } else if a > b {
        1
    } else {
        0
    }
}

/// Evaluates an `if<cond>` comparison of `a` against `b`.
fn int_condition(opcode: u8, a: i32, b: i32) -> bool {
    match opcode {
        IFEQ | IF_ICMPEQ => a == b,
        IFNE | IF_ICMPNE => a != b,
        IFLT | IF_ICMPLT => a < b,
        IFGE | IF_ICMPGE => a >= b,
        IFGT | IF_ICMPGT => a > b,
        _ => a <= b,
    }
}

impl Processor<'_> {
    /// A fresh value produced by the instruction at `offset`. Stale copies of the previous
    /// value of that instruction are forgotten first.
    fn fresh(
        &self,
        offset: usize,
        kind: ComputationalType,
        not_null: bool,
        vars: &mut TracedVariables,
        stack: &mut TracedStack,
    ) -> Value {
        match self.factory {
            ValueFactory::Precise => {
                let symbol = Symbol::Instruction(offset as u32);
                vars.invalidate(symbol);
                stack.invalidate(symbol);
                Value::specific(kind, symbol, not_null)
            }
            ValueFactory::Simple => match kind {
                ComputationalType::Reference => {
                    Value::Reference(ReferenceValue::Unknown { not_null })
                }
                other => Value::unknown(other),
            },
        }
    }

    /// A computed value: the particular if known, otherwise a fresh one.
    fn computed(
        &self,
        offset: usize,
        kind: ComputationalType,
        particular: Option<Value>,
        vars: &mut TracedVariables,
        stack: &mut TracedStack,
    ) -> Value {
        match particular {
            Some(value) => self.factory.constant(value),
            None => self.fresh(offset, kind, false, vars, stack),
        }
    }

    /// A value supplied by the invocation unit, if it has the expected kind.
    fn supplied(&self, value: Option<Value>, kind: ComputationalType) -> Option<Value> {
        value
            .filter(|v| v.computational_type() == Some(kind))
            .map(|v| self.factory.constant(v))
    }

    /// Executes `instruction` at `offset`, whose encoded length is `length`.
    ///
    /// # Errors
    ///
    /// Returns an error on stack underflow, invalid local variables, invalid constant pool
    /// references and `ret` through a slot that holds no return address.
    pub fn execute(
        &self,
        offset: usize,
        instruction: &Instruction,
        length: usize,
        vars: &mut TracedVariables,
        stack: &mut TracedStack,
    ) -> Result<Step> {
        let next = offset + length;
        let produced = OriginSet::instruction(offset);
        let mut step = Step {
            successors: if instruction.falls_through() {
                vec![next]
            } else {
                Vec::new()
            },
            event: None,
        };
        let op = instruction.opcode;

        if let Some((access, kind, index)) = instruction.local_access() {
            match access {
                LocalAccess::Load => {
                    let value = vars.load(index)?.value.clone();
                    let value = if value.computational_type() == Some(kind)
                        || (kind == ComputationalType::Reference
                            && value.return_addresses().is_some())
                    {
                        value
                    } else {
                        Value::unknown(kind)
                    };
                    stack.push(value, produced);
                }
                LocalAccess::Store => {
                    let value = stack.pop(kind.size())?;
                    let value = if kind.size() == 2 && !value.is_category2() {
                        Value::unknown(kind)
                    } else {
                        value
                    };
                    vars.store(index, value, produced)?;
                }
            }
            return Ok(step);
        }

        if let Some(movement) = StackMove::of(op) {
            if !movement.fits(stack.words(), |slot: &Slot| slot.value.is_category2()) {
                return Err(malformed_error!(
                    "{} at {} splits a category-2 value or underflows",
                    instruction.mnemonic(),
                    offset
                ));
            }
            let mut popped = Vec::with_capacity(movement.pops);
            for _ in 0..movement.pops {
                popped.push(stack.pop_word()?);
            }
            popped.reverse();
            for &source in movement.outputs {
                stack.push_word(Slot::new(popped[source].value.clone(), produced.clone()));
            }
            return Ok(step);
        }

        match op {
            NOP => {}
            ACONST_NULL => stack.push(
                self.factory.constant(Value::Reference(ReferenceValue::Null)),
                produced,
            ),
            ICONST_M1..=ICONST_5 => stack.push(
                self.factory.constant(Value::int(i32::from(op) - i32::from(ICONST_0))),
                produced,
            ),
            LCONST_0 | LCONST_1 => stack.push(
                self.factory.constant(Value::long(i64::from(op - LCONST_0))),
                produced,
            ),
            FCONST_0..=FCONST_2 => stack.push(
                self.factory.constant(Value::float(f32::from(op - FCONST_0))),
                produced,
            ),
            DCONST_0 | DCONST_1 => stack.push(
                self.factory.constant(Value::double(f64::from(op - DCONST_0))),
                produced,
            ),
            BIPUSH | SIPUSH => {
                let value = match instruction.operand {
                    Operand::Byte(v) => i32::from(v),
                    Operand::Short(v) => i32::from(v),
                    _ => return Err(malformed_error!("{} without immediate", instruction.mnemonic())),
                };
                stack.push(self.factory.constant(Value::int(value)), produced);
            }
            LDC | LDC_W | LDC2_W => {
                let index = instruction
                    .constant_index()
                    .ok_or_else(|| malformed_error!("ldc without constant at {}", offset))?;
                let value = match self.pool.get(index)? {
                    Constant::Integer(v) => self.factory.constant(Value::int(*v)),
                    Constant::Float(v) => self.factory.constant(Value::float(*v)),
                    Constant::Long(v) => self.factory.constant(Value::long(*v)),
                    Constant::Double(v) => self.factory.constant(Value::double(*v)),
                    Constant::String { .. }
                    | Constant::Class { .. }
                    | Constant::MethodType { .. }
                    | Constant::MethodHandle { .. } => {
                        self.fresh(offset, ComputationalType::Reference, true, vars, stack)
                    }
                    Constant::Dynamic {
                        name_and_type_index,
                        ..
                    } => {
                        let (_, descriptor) = self.pool.name_and_type(*name_and_type_index)?;
                        let kind = FieldType::parse(descriptor)?.computational_type();
                        self.fresh(offset, kind, false, vars, stack)
                    }
                    other => {
                        return Err(malformed_error!(
                            "ldc of {} constant at {}",
                            other.kind(),
                            offset
                        ))
                    }
                };
                stack.push(value, produced);
            }
            IALOAD..=SALOAD => {
                stack.pop(1)?;
                stack.pop(1)?;
                let kind = match op {
                    LALOAD => ComputationalType::Long,
                    FALOAD => ComputationalType::Float,
                    DALOAD => ComputationalType::Double,
                    AALOAD => ComputationalType::Reference,
                    _ => ComputationalType::Int,
                };
                let value = self.fresh(offset, kind, false, vars, stack);
                stack.push(value, produced);
            }
            IASTORE..=SASTORE => {
                let words = if matches!(op, LASTORE | DASTORE) { 2 } else { 1 };
                stack.pop(words)?;
                stack.pop(1)?;
                stack.pop(1)?;
            }
            IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
                let b = stack.pop_kind(ComputationalType::Int)?;
                let a = stack.pop_kind(ComputationalType::Int)?;
                let particular = match (a.int_value(), b.int_value()) {
                    (Some(a), Some(b)) => fold_int(op, a, b).map(Value::int),
                    _ if matches!(op, ISUB | IXOR) && a.same_identity(&b) => Some(Value::int(0)),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                stack.push(value, produced);
            }
            LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => {
                let b = stack.pop_kind(ComputationalType::Long)?;
                let a = stack.pop_kind(ComputationalType::Long)?;
                let particular = match (a.long_value(), b.long_value()) {
                    (Some(a), Some(b)) => fold_long(op, a, b).map(Value::long),
                    _ if matches!(op, LSUB | LXOR) && a.same_identity(&b) => Some(Value::long(0)),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Long, particular, vars, stack);
                stack.push(value, produced);
            }
            LSHL | LSHR | LUSHR => {
                let distance = stack.pop_kind(ComputationalType::Int)?;
                let a = stack.pop_kind(ComputationalType::Long)?;
                let particular = match (a.long_value(), distance.int_value()) {
                    (Some(a), Some(d)) => Some(Value::long(fold_long_shift(op, a, d))),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Long, particular, vars, stack);
                stack.push(value, produced);
            }
            FADD | FSUB | FMUL | FDIV | FREM => {
                let b = stack.pop_kind(ComputationalType::Float)?;
                let a = stack.pop_kind(ComputationalType::Float)?;
                let particular = match (a.float_value(), b.float_value()) {
                    (Some(a), Some(b)) => Some(Value::float(fold_float(op, a, b))),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Float, particular, vars, stack);
                stack.push(value, produced);
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                let b = stack.pop_kind(ComputationalType::Double)?;
                let a = stack.pop_kind(ComputationalType::Double)?;
                let particular = match (a.double_value(), b.double_value()) {
                    (Some(a), Some(b)) => Some(Value::double(fold_double(op, a, b))),
                    _ => None,
                };
                let value =
                    self.computed(offset, ComputationalType::Double, particular, vars, stack);
                stack.push(value, produced);
            }
            INEG => {
                let a = stack.pop_kind(ComputationalType::Int)?;
                let particular = a.int_value().map(|v| Value::int(v.wrapping_neg()));
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                stack.push(value, produced);
            }
            LNEG => {
                let a = stack.pop_kind(ComputationalType::Long)?;
                let particular = a.long_value().map(|v| Value::long(v.wrapping_neg()));
                let value = self.computed(offset, ComputationalType::Long, particular, vars, stack);
                stack.push(value, produced);
            }
            FNEG => {
                let a = stack.pop_kind(ComputationalType::Float)?;
                let particular = a.float_value().map(|v| Value::float(-v));
                let value = self.computed(offset, ComputationalType::Float, particular, vars, stack);
                stack.push(value, produced);
            }
            DNEG => {
                let a = stack.pop_kind(ComputationalType::Double)?;
                let particular = a.double_value().map(|v| Value::double(-v));
                let value =
                    self.computed(offset, ComputationalType::Double, particular, vars, stack);
                stack.push(value, produced);
            }
            I2L..=I2S => {
                let kind = match op {
                    I2L | I2F | I2D | I2B | I2C | I2S => ComputationalType::Int,
                    L2I | L2F | L2D => ComputationalType::Long,
                    F2I | F2L | F2D => ComputationalType::Float,
                    _ => ComputationalType::Double,
                };
                let a = stack.pop_kind(kind)?;
                let (result_kind, particular) = convert(op, kind, &a);
                let value = self.computed(offset, result_kind, particular, vars, stack);
                stack.push(value, produced);
            }
            LCMP => {
                let b = stack.pop_kind(ComputationalType::Long)?;
                let a = stack.pop_kind(ComputationalType::Long)?;
                let particular = match (a.long_value(), b.long_value()) {
                    (Some(a), Some(b)) => Some(Value::int(a.cmp(&b) as i32)),
                    _ if a.same_identity(&b) => Some(Value::int(0)),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                stack.push(value, produced);
            }
            FCMPL | FCMPG => {
                let b = stack.pop_kind(ComputationalType::Float)?;
                let a = stack.pop_kind(ComputationalType::Float)?;
                let nan = if op == FCMPL { -1 } else { 1 };
                let particular = match (a.float_value(), b.float_value()) {
                    (Some(a), Some(b)) => Some(Value::int(compare_floats(
                        f64::from(a),
                        f64::from(b),
                        nan,
                    ))),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                stack.push(value, produced);
            }
            DCMPL | DCMPG => {
                let b = stack.pop_kind(ComputationalType::Double)?;
                let a = stack.pop_kind(ComputationalType::Double)?;
                let nan = if op == DCMPL { -1 } else { 1 };
                let particular = match (a.double_value(), b.double_value()) {
                    (Some(a), Some(b)) => Some(Value::int(compare_floats(a, b, nan))),
                    _ => None,
                };
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                stack.push(value, produced);
            }
            IINC => {
                let Operand::Iinc { index, delta } = instruction.operand else {
                    return Err(malformed_error!("iinc without operand at {}", offset));
                };
                let current = vars.load(index)?.value.clone();
                let particular = current
                    .as_int()
                    .map(|v| Value::int(v.wrapping_add(i32::from(delta))));
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                vars.store(index, value, produced)?;
            }
            IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL => {
                let decision = self.condition(op, stack)?;
                let target = instruction
                    .branch_targets(offset)?
                    .first()
                    .copied()
                    .ok_or_else(|| malformed_error!("branch without target at {}", offset))?;
                step.successors = match decision {
                    Some(true) => vec![target],
                    Some(false) => vec![next],
                    None if target == next => vec![next],
                    None => vec![target, next],
                };
            }
            GOTO | GOTO_W => step.successors = instruction.branch_targets(offset)?,
            JSR | JSR_W => {
                let target = instruction
                    .branch_targets(offset)?
                    .first()
                    .copied()
                    .ok_or_else(|| malformed_error!("jsr without target at {}", offset))?;
                stack.push(Value::ReturnAddress(OffsetSet::single(next)), produced);
                step.successors = vec![target];
                step.event = Some(Event::SubroutineCall {
                    target,
                    return_offset: next,
                });
            }
            RET => {
                let index = instruction
                    .local_index()
                    .ok_or_else(|| malformed_error!("ret without slot at {}", offset))?;
                let addresses = vars
                    .load(index)?
                    .value
                    .return_addresses()
                    .cloned()
                    .ok_or_else(|| {
                        malformed_error!("ret at {} through slot {} without return address", offset, index)
                    })?;
                step.successors = addresses.iter().collect();
                step.event = Some(Event::SubroutineReturn(addresses));
            }
            TABLESWITCH | LOOKUPSWITCH => {
                let key = stack.pop_kind(ComputationalType::Int)?.int_value();
                let targets = instruction.branch_targets(offset)?;
                let chosen = key.map(|key| match &instruction.operand {
                    Operand::TableSwitch { low, high, .. } if (*low..=*high).contains(&key) => {
                        targets[(i64::from(key) - i64::from(*low)) as usize + 1]
                    }
                    Operand::LookupSwitch { pairs, .. } => pairs
                        .iter()
                        .position(|(k, _)| *k == key)
                        .map_or(targets[0], |i| targets[i + 1]),
                    _ => targets[0],
                });
                step.successors = match chosen {
                    Some(target) => vec![target],
                    None => {
                        let mut all = targets;
                        all.sort_unstable();
                        all.dedup();
                        all
                    }
                };
            }
            IRETURN | FRETURN | ARETURN => {
                stack.pop(1)?;
            }
            LRETURN | DRETURN => {
                stack.pop(2)?;
            }
            RETURN => {}
            GETSTATIC | GETFIELD => {
                if op == GETFIELD {
                    stack.pop(1)?;
                }
                let field = self.member(instruction)?;
                let kind = FieldType::parse(&field.descriptor)?.computational_type();
                let value = match self.supplied(self.unit.field_value(&field), kind) {
                    Some(value) => value,
                    None => self.fresh(offset, kind, false, vars, stack),
                };
                stack.push(value, produced);
            }
            PUTSTATIC | PUTFIELD => {
                let size = instruction.field_type(self.pool)?.size();
                stack.pop(size)?;
                if op == PUTFIELD {
                    stack.pop(1)?;
                }
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC => {
                let descriptor = instruction.method_descriptor(self.pool)?;
                for parameter in descriptor.parameters.iter().rev() {
                    stack.pop(parameter.size())?;
                }
                let member = if op == INVOKEDYNAMIC {
                    None
                } else {
                    Some(self.member(instruction)?)
                };
                if !matches!(op, INVOKESTATIC | INVOKEDYNAMIC) {
                    let receiver = stack.pop(1)?;
                    if op == INVOKESPECIAL && member.as_ref().is_some_and(|m| m.is_initializer()) {
                        step.event = Some(Event::Initialization(receiver.symbol()));
                    }
                }
                if let Some(return_type) = &descriptor.return_type {
                    let kind = return_type.computational_type();
                    let supplied = member
                        .as_ref()
                        .and_then(|m| self.supplied(self.unit.return_value(m), kind));
                    let value = match supplied {
                        Some(value) => value,
                        None => self.fresh(offset, kind, false, vars, stack),
                    };
                    stack.push(value, produced);
                }
            }
            NEW => {
                let value = self.fresh(offset, ComputationalType::Reference, true, vars, stack);
                stack.push(value, produced);
            }
            NEWARRAY | ANEWARRAY => {
                stack.pop(1)?;
                let value = self.fresh(offset, ComputationalType::Reference, true, vars, stack);
                stack.push(value, produced);
            }
            MULTIANEWARRAY => {
                let Operand::MultiANewArray { dimensions, .. } = instruction.operand else {
                    return Err(malformed_error!("multianewarray without dimensions"));
                };
                for _ in 0..dimensions {
                    stack.pop(1)?;
                }
                let value = self.fresh(offset, ComputationalType::Reference, true, vars, stack);
                stack.push(value, produced);
            }
            ARRAYLENGTH => {
                stack.pop(1)?;
                let value = self.fresh(offset, ComputationalType::Int, false, vars, stack);
                stack.push(value, produced);
            }
            ATHROW | MONITORENTER | MONITOREXIT => {
                stack.pop(1)?;
            }
            CHECKCAST => {
                let value = stack.pop(1)?;
                let value = if value.is_null() {
                    value
                } else {
                    let not_null = value.is_not_null();
                    self.fresh(offset, ComputationalType::Reference, not_null, vars, stack)
                };
                stack.push(value, produced);
            }
            INSTANCEOF => {
                let value = stack.pop(1)?;
                let particular = value.is_null().then(|| Value::int(0));
                let value = self.computed(offset, ComputationalType::Int, particular, vars, stack);
                stack.push(value, produced);
            }
            other => return Err(crate::Error::InvalidOpcode(other)),
        }

        Ok(step)
    }

    fn member(&self, instruction: &Instruction) -> Result<crate::classfile::MemberRef> {
        let index = instruction.constant_index().ok_or_else(|| {
            malformed_error!("{} without constant operand", instruction.mnemonic())
        })?;
        self.pool.member_ref(index)
    }

    /// Pops the operands of a conditional branch and decides it, if possible.
    fn condition(&self, op: u8, stack: &mut TracedStack) -> Result<Option<bool>> {
        Ok(match op {
            IFEQ..=IFLE => {
                let a = stack.pop_kind(ComputationalType::Int)?;
                a.int_value().map(|a| int_condition(op, a, 0))
            }
            IF_ICMPEQ..=IF_ICMPLE => {
                let b = stack.pop_kind(ComputationalType::Int)?;
                let a = stack.pop_kind(ComputationalType::Int)?;
                match (a.int_value(), b.int_value()) {
                    (Some(a), Some(b)) => Some(int_condition(op, a, b)),
                    _ if a.same_identity(&b) => Some(matches!(op, IF_ICMPEQ | IF_ICMPGE | IF_ICMPLE)),
                    _ => None,
                }
            }
            IF_ACMPEQ | IF_ACMPNE => {
                let b = stack.pop(1)?;
                let a = stack.pop(1)?;
                let equal = if (a.is_null() && b.is_null()) || a.same_identity(&b) {
                    Some(true)
                } else if (a.is_null() && b.is_not_null()) || (a.is_not_null() && b.is_null()) {
                    Some(false)
                } else {
                    None
                };
                equal.map(|equal| equal == (op == IF_ACMPEQ))
            }
            _ => {
                let a = stack.pop(1)?;
                let null = if a.is_null() {
                    Some(true)
                } else if a.is_not_null() {
                    Some(false)
                } else {
                    None
                };
                null.map(|null| null == (op == IFNULL))
            }
        })
    }
}

/// Applies a conversion opcode, returning the result kind and the particular result.
fn convert(op: u8, kind: ComputationalType, a: &Value) -> (ComputationalType, Option<Value>) {
    let result = match op {
        I2L | F2L | D2L => ComputationalType::Long,
        I2F | L2F | D2F => ComputationalType::Float,
        I2D | L2D | F2D => ComputationalType::Double,
        _ => ComputationalType::Int,
    };
    let particular = match kind {
        ComputationalType::Int => a.int_value().map(|v| match op {
            I2L => Value::long(i64::from(v)),
            I2F => Value::float(v as f32),
            I2D => Value::double(f64::from(v)),
            I2B => Value::int(i32::from(v as i8)),
            I2C => Value::int(i32::from(v as u16)),
            _ => Value::int(i32::from(v as i16)),
        }),
        ComputationalType::Long => a.long_value().map(|v| match op {
            L2I => Value::int(v as i32),
            L2F => Value::float(v as f32),
            _ => Value::double(v as f64),
        }),
        ComputationalType::Float => a.float_value().map(|v| match op {
            F2I => Value::int(v as i32),
            F2L => Value::long(v as i64),
            _ => Value::double(f64::from(v)),
        }),
        _ => a.double_value().map(|v| match op {
            D2I => Value::int(v as i32),
            D2L => Value::long(v as i64),
            _ => Value::float(v as f32),
        }),
    };
    (result, particular)
}

impl ValueFactory {
    /// Passes particulars through in precise mode and degrades them in simple mode.
    pub(crate) fn constant(self, value: Value) -> Value {
        match self {
            ValueFactory::Precise => value,
            ValueFactory::Simple => match value {
                Value::Reference(_) => Value::Reference(ReferenceValue::Unknown {
                    not_null: value.is_not_null(),
                }),
                Value::Integer(_) => Value::Integer(Abstract::Unknown),
                Value::Long(_) => Value::Long(Abstract::Unknown),
                Value::Float(_) => Value::Float(Abstract::Unknown),
                Value::Double(_) => Value::Double(Abstract::Unknown),
                other => other,
            },
        }
    }
}
