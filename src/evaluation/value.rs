//! Abstract values of the partial evaluator.
//!
//! Every operand stack word and local variable slot holds a [`Value`]. Numeric values carry a
//! precision level through [`Abstract`]:
//!
//! - **Unknown** - nothing is known
//! - **Specific** - the value is identified by a [`Symbol`], so two values with the same symbol
//!   are the same runtime value, but the number itself is not known
//! - **Particular** - the concrete constant
//!
//! References distinguish `null`, values with a symbolic identity and unknown values, and
//! remember whether they are known to be non-null. Category-2 values (`long`, `double`) occupy
//! two words; the second word is [`Value::Top`].
//!
//! # Lattice
//!
//! `join(x, x) = x`, two different particulars or symbols join to unknown, and values of
//! different kinds join to [`Value::Top`]. Return addresses join by union.

use std::fmt;

use crate::{
    classfile::ComputationalType,
    evaluation::{JoinSemiLattice, OffsetSet},
};

/// Symbolic identity of a value whose number is not known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    /// The value of a parameter slot at method entry
    Parameter(u16),
    /// The value produced by the latest execution of the instruction at this offset
    Instruction(u32),
    /// The exception caught by the handler at this offset
    CaughtException(u32),
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Parameter(slot) => write!(f, "p{slot}"),
            Symbol::Instruction(offset) => write!(f, "@{offset}"),
            Symbol::CaughtException(offset) => write!(f, "catch@{offset}"),
        }
    }
}

/// How much is known about a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precision {
    /// Nothing is known
    Unknown,
    /// The value has a symbolic identity
    Specific,
    /// The value is a known constant
    Particular,
}

/// A primitive value at one of the three precision levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abstract<T> {
    /// Nothing is known
    Unknown,
    /// Identified by a symbol
    Specific(Symbol),
    /// Known constant
    Particular(T),
}

impl<T: Copy + PartialEq> Abstract<T> {
    /// Returns the constant, if known.
    #[must_use]
    pub fn particular(&self) -> Option<T> {
        match self {
            Abstract::Particular(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the symbol, if the value has one.
    #[must_use]
    pub fn symbol(&self) -> Option<Symbol> {
        match self {
            Abstract::Specific(symbol) => Some(*symbol),
            _ => None,
        }
    }

    fn precision(&self) -> Precision {
        match self {
            Abstract::Unknown => Precision::Unknown,
            Abstract::Specific(_) => Precision::Specific,
            Abstract::Particular(_) => Precision::Particular,
        }
    }

    fn join(&self, other: &Self) -> Self {
        if self == other {
            *self
        } else {
            Abstract::Unknown
        }
    }
}

/// A reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceValue {
    /// The `null` reference
    Null,
    /// Any reference
    Unknown {
        /// Known to be non-null
        not_null: bool,
    },
    /// A reference with a symbolic identity
    Specific {
        /// Identity
        symbol: Symbol,
        /// Known to be non-null
        not_null: bool,
    },
}

impl ReferenceValue {
    /// Returns `true` if the reference can not be `null`.
    #[must_use]
    pub fn is_not_null(&self) -> bool {
        match self {
            ReferenceValue::Null => false,
            ReferenceValue::Unknown { not_null } | ReferenceValue::Specific { not_null, .. } => {
                *not_null
            }
        }
    }

    fn join(&self, other: &Self) -> Self {
        if self == other {
            return *self;
        }
        match (self, other) {
            (
                ReferenceValue::Specific { symbol: a, not_null: x },
                ReferenceValue::Specific { symbol: b, not_null: y },
            ) if a == b => ReferenceValue::Specific {
                symbol: *a,
                not_null: *x && *y,
            },
            _ => ReferenceValue::Unknown {
                not_null: self.is_not_null() && other.is_not_null(),
            },
        }
    }
}

/// An abstract stack word or local variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Unusable: the second word of a category-2 value, an unset local, or the join of
    /// incompatible kinds
    Top,
    /// `int`, also `boolean`, `byte`, `char` and `short`
    Integer(Abstract<i32>),
    /// `long`
    Long(Abstract<i64>),
    /// `float`, particulars stored as raw bits
    Float(Abstract<u32>),
    /// `double`, particulars stored as raw bits
    Double(Abstract<u64>),
    /// Object or array reference
    Reference(ReferenceValue),
    /// Return address pushed by `jsr`: the possible return offsets
    ReturnAddress(OffsetSet),
}

impl Value {
    /// An unknown value of `kind`.
    #[must_use]
    pub fn unknown(kind: ComputationalType) -> Value {
        match kind {
            ComputationalType::Int => Value::Integer(Abstract::Unknown),
            ComputationalType::Long => Value::Long(Abstract::Unknown),
            ComputationalType::Float => Value::Float(Abstract::Unknown),
            ComputationalType::Double => Value::Double(Abstract::Unknown),
            ComputationalType::Reference => {
                Value::Reference(ReferenceValue::Unknown { not_null: false })
            }
        }
    }

    /// A value of `kind` identified by `symbol`.
    #[must_use]
    pub fn specific(kind: ComputationalType, symbol: Symbol, not_null: bool) -> Value {
        match kind {
            ComputationalType::Int => Value::Integer(Abstract::Specific(symbol)),
            ComputationalType::Long => Value::Long(Abstract::Specific(symbol)),
            ComputationalType::Float => Value::Float(Abstract::Specific(symbol)),
            ComputationalType::Double => Value::Double(Abstract::Specific(symbol)),
            ComputationalType::Reference => {
                Value::Reference(ReferenceValue::Specific { symbol, not_null })
            }
        }
    }

    /// A particular `int`.
    #[must_use]
    pub fn int(value: i32) -> Value {
        Value::Integer(Abstract::Particular(value))
    }

    /// A particular `long`.
    #[must_use]
    pub fn long(value: i64) -> Value {
        Value::Long(Abstract::Particular(value))
    }

    /// A particular `float`.
    #[must_use]
    pub fn float(value: f32) -> Value {
        Value::Float(Abstract::Particular(value.to_bits()))
    }

    /// A particular `double`.
    #[must_use]
    pub fn double(value: f64) -> Value {
        Value::Double(Abstract::Particular(value.to_bits()))
    }

    /// The computational type, `None` for [`Value::Top`] and return addresses.
    #[must_use]
    pub fn computational_type(&self) -> Option<ComputationalType> {
        match self {
            Value::Integer(_) => Some(ComputationalType::Int),
            Value::Long(_) => Some(ComputationalType::Long),
            Value::Float(_) => Some(ComputationalType::Float),
            Value::Double(_) => Some(ComputationalType::Double),
            Value::Reference(_) => Some(ComputationalType::Reference),
            Value::Top | Value::ReturnAddress(_) => None,
        }
    }

    /// Returns `true` for `long` and `double`.
    #[must_use]
    pub fn is_category2(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// How much is known about the value.
    #[must_use]
    pub fn precision(&self) -> Precision {
        match self {
            Value::Top => Precision::Unknown,
            Value::Integer(a) => a.precision(),
            Value::Long(a) => a.precision(),
            Value::Float(a) => a.precision(),
            Value::Double(a) => a.precision(),
            Value::Reference(ReferenceValue::Null) | Value::ReturnAddress(_) => {
                Precision::Particular
            }
            Value::Reference(ReferenceValue::Specific { .. }) => Precision::Specific,
            Value::Reference(ReferenceValue::Unknown { .. }) => Precision::Unknown,
        }
    }

    /// Returns `true` for known constants, including `null`.
    #[must_use]
    pub fn is_particular(&self) -> bool {
        self.precision() == Precision::Particular
    }

    /// Returns `true` for values with a symbolic identity or a known constant.
    #[must_use]
    pub fn is_specific(&self) -> bool {
        self.precision() >= Precision::Specific
    }

    /// The symbolic identity, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<Symbol> {
        match self {
            Value::Integer(a) => a.symbol(),
            Value::Long(a) => a.symbol(),
            Value::Float(a) => a.symbol(),
            Value::Double(a) => a.symbol(),
            Value::Reference(ReferenceValue::Specific { symbol, .. }) => Some(*symbol),
            _ => None,
        }
    }

    /// Returns `true` if both values are the same runtime value by symbolic identity.
    ///
    /// This never compares numbers: two particulars with equal numbers are not considered
    /// the same identity.
    #[must_use]
    pub fn same_identity(&self, other: &Value) -> bool {
        self.computational_type() == other.computational_type()
            && self.symbol().is_some()
            && self.symbol() == other.symbol()
    }

    /// The particular `int`, if known.
    ///
    /// # Panics
    ///
    /// Panics if this is not an `int` value.
    #[must_use]
    pub fn int_value(&self) -> Option<i32> {
        match self {
            Value::Integer(a) => a.particular(),
            other => wrong_kind("int", other),
        }
    }

    /// The particular `long`, if known.
    ///
    /// # Panics
    ///
    /// Panics if this is not a `long` value.
    #[must_use]
    pub fn long_value(&self) -> Option<i64> {
        match self {
            Value::Long(a) => a.particular(),
            other => wrong_kind("long", other),
        }
    }

    /// The particular `float`, if known.
    ///
    /// # Panics
    ///
    /// Panics if this is not a `float` value.
    #[must_use]
    pub fn float_value(&self) -> Option<f32> {
        match self {
            Value::Float(a) => a.particular().map(f32::from_bits),
            other => wrong_kind("float", other),
        }
    }

    /// The particular `double`, if known.
    ///
    /// # Panics
    ///
    /// Panics if this is not a `double` value.
    #[must_use]
    pub fn double_value(&self) -> Option<f64> {
        match self {
            Value::Double(a) => a.particular().map(f64::from_bits),
            other => wrong_kind("double", other),
        }
    }

    /// The particular `int`, or `None` for unknown ints and values of other kinds.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Integer(a) => a.particular(),
            _ => None,
        }
    }

    /// Like [`Value::as_int`] for `long`.
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(a) => a.particular(),
            _ => None,
        }
    }

    /// Like [`Value::as_int`] for `float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(a) => a.particular().map(f32::from_bits),
            _ => None,
        }
    }

    /// Like [`Value::as_int`] for `double`.
    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(a) => a.particular().map(f64::from_bits),
            _ => None,
        }
    }

    /// The reference, if this is one.
    #[must_use]
    pub fn reference(&self) -> Option<ReferenceValue> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns `true` for the `null` constant.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Reference(ReferenceValue::Null))
    }

    /// Returns `true` for references known to be non-null.
    #[must_use]
    pub fn is_not_null(&self) -> bool {
        matches!(self, Value::Reference(r) if r.is_not_null())
    }

    /// The return offsets of a return address.
    #[must_use]
    pub fn return_addresses(&self) -> Option<&OffsetSet> {
        match self {
            Value::ReturnAddress(set) => Some(set),
            _ => None,
        }
    }

    /// Forgets the identity `symbol`, keeping the kind and nullness.
    #[must_use]
    pub fn without_symbol(&self, symbol: Symbol) -> Value {
        if self.symbol() != Some(symbol) {
            return self.clone();
        }
        match self {
            Value::Reference(r) => Value::Reference(ReferenceValue::Unknown {
                not_null: r.is_not_null(),
            }),
            other => other
                .computational_type()
                .map_or(Value::Top, Value::unknown),
        }
    }
}

impl JoinSemiLattice for Value {
    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.join(b)),
            (Value::Long(a), Value::Long(b)) => Value::Long(a.join(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a.join(b)),
            (Value::Double(a), Value::Double(b)) => Value::Double(a.join(b)),
            (Value::Reference(a), Value::Reference(b)) => Value::Reference(a.join(b)),
            (Value::ReturnAddress(a), Value::ReturnAddress(b)) => Value::ReturnAddress(a.join(b)),
            _ => Value::Top,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show<T: fmt::Display>(
            f: &mut fmt::Formatter<'_>,
            tag: &str,
            value: &Abstract<T>,
        ) -> fmt::Result {
            match value {
                Abstract::Unknown => write!(f, "{tag}?"),
                Abstract::Specific(symbol) => write!(f, "{tag}:{symbol}"),
                Abstract::Particular(v) => write!(f, "{tag}({v})"),
            }
        }
        match self {
            Value::Top => f.write_str("T"),
            Value::Integer(a) => show(f, "i", a),
            Value::Long(a) => show(f, "l", a),
            Value::Float(a) => match a {
                Abstract::Particular(bits) => write!(f, "f({})", f32::from_bits(*bits)),
                other => show(f, "f", other),
            },
            Value::Double(a) => match a {
                Abstract::Particular(bits) => write!(f, "d({})", f64::from_bits(*bits)),
                other => show(f, "d", other),
            },
            Value::Reference(ReferenceValue::Null) => f.write_str("null"),
            Value::Reference(ReferenceValue::Unknown { not_null }) => {
                write!(f, "a?{}", if *not_null { "!" } else { "" })
            }
            Value::Reference(ReferenceValue::Specific { symbol, not_null }) => {
                write!(f, "a:{symbol}{}", if *not_null { "!" } else { "" })
            }
            Value::ReturnAddress(set) => write!(f, "ret{set}"),
        }
    }
}

#[cold]
#[track_caller]
fn wrong_kind(expected: &str, value: &Value) -> ! {
    panic!("{expected} accessor called on {value}")
}
