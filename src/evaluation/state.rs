//! Traced local variables and operand stack.
//!
//! Both hold [`Slot`]s: a [`Value`] plus the [`OriginSet`] of instructions that produced it.
//! A category-2 value occupies two words. On the stack the lower word is [`Value::Top`] and
//! the upper word, closer to the top, holds the value; in the variables the value sits in the
//! lower slot `n` and slot `n + 1` is [`Value::Top`].

use std::fmt;

use crate::{
    classfile::ComputationalType,
    evaluation::{JoinSemiLattice, Origin, OriginSet, Symbol, Value},
    Result,
};

/// A value together with its producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// The abstract value
    pub value: Value,
    /// Instructions (or method entry, or handler entry) that produced it
    pub producers: OriginSet,
}

impl Slot {
    /// Creates a slot.
    #[must_use]
    pub fn new(value: Value, producers: OriginSet) -> Self {
        Slot { value, producers }
    }

    fn top(producers: OriginSet) -> Self {
        Slot::new(Value::Top, producers)
    }
}

impl JoinSemiLattice for Slot {
    fn join(&self, other: &Self) -> Self {
        Slot {
            value: self.value.join(&other.value),
            producers: self.producers.join(&other.producers),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Local variable slots at one program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedVariables {
    slots: Vec<Slot>,
}

impl TracedVariables {
    /// Creates `size` slots holding [`Value::Top`], produced at method entry.
    #[must_use]
    pub fn new(size: usize) -> Self {
        TracedVariables {
            slots: vec![Slot::top(OriginSet::single(Origin::MethodEntry)); size],
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// The slot at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is beyond `max_locals`.
    pub fn load(&self, index: u16) -> Result<&Slot> {
        self.slots.get(usize::from(index)).ok_or_else(|| {
            malformed_error!(
                "Local variable {} out of range ({} slots)",
                index,
                self.slots.len()
            )
        })
    }

    /// Stores `value` into slot `index`, clobbering the halves of any category-2 value it
    /// overlaps.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not fit in `max_locals`.
    pub fn store(&mut self, index: u16, value: Value, producers: OriginSet) -> Result<()> {
        let index = usize::from(index);
        let width = if value.is_category2() { 2 } else { 1 };
        if index + width > self.slots.len() {
            return Err(malformed_error!(
                "Store to local variable {} out of range ({} slots)",
                index,
                self.slots.len()
            ));
        }
        if index > 0 && self.slots[index - 1].value.is_category2() {
            self.slots[index - 1].value = Value::Top;
        }
        if width == 2 {
            self.slots[index + 1] = Slot::top(producers.clone());
        }
        self.slots[index] = Slot::new(value, producers);
        Ok(())
    }

    /// Iterates over `(slot index, slot)`.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Slot)> {
        self.slots.iter().enumerate().map(|(i, s)| (i as u16, s))
    }

    /// Forgets `symbol` in every slot.
    pub fn invalidate(&mut self, symbol: Symbol) {
        for slot in &mut self.slots {
            if slot.value.symbol() == Some(symbol) {
                slot.value = slot.value.without_symbol(symbol);
            }
        }
    }
}

impl JoinSemiLattice for TracedVariables {
    fn join(&self, other: &Self) -> Self {
        TracedVariables {
            slots: self
                .slots
                .iter()
                .zip(&other.slots)
                .map(|(a, b)| a.join(b))
                .collect(),
        }
    }
}

impl fmt::Display for TracedVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{slot}")?;
        }
        f.write_str("]")
    }
}

/// The operand stack at one program point, bottom first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracedStack {
    words: Vec<Slot>,
}

impl TracedStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of words.
    #[must_use]
    pub fn size(&self) -> usize {
        self.words.len()
    }

    /// Pushes a value; category-2 values take two words.
    pub fn push(&mut self, value: Value, producers: OriginSet) {
        if value.is_category2() {
            self.words.push(Slot::top(producers.clone()));
        }
        self.words.push(Slot::new(value, producers));
    }

    /// Pushes a single word.
    pub fn push_word(&mut self, slot: Slot) {
        self.words.push(slot);
    }

    /// Pops a single word.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty stack.
    pub fn pop_word(&mut self) -> Result<Slot> {
        self.words
            .pop()
            .ok_or_else(|| malformed_error!("Operand stack underflow"))
    }

    /// Pops a value of `words` words (1 or 2) and returns the value word.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack holds fewer words.
    pub fn pop(&mut self, words: usize) -> Result<Value> {
        let top = self.pop_word()?;
        for _ in 1..words {
            self.pop_word()?;
        }
        Ok(top.value)
    }

    /// Pops a value that must be of computational type `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error on underflow or if the value on top is of another kind.
    pub fn pop_kind(&mut self, kind: ComputationalType) -> Result<Value> {
        let value = self.pop(kind.size())?;
        if value.computational_type() != Some(kind) {
            return Err(malformed_error!(
                "Expected {:?} on the operand stack, found {}",
                kind,
                value
            ));
        }
        Ok(value)
    }

    /// The word `depth` positions below the top (0 is the top).
    #[must_use]
    pub fn peek(&self, depth: usize) -> Option<&Slot> {
        self.words
            .len()
            .checked_sub(depth + 1)
            .map(|index| &self.words[index])
    }

    /// The word at absolute position `index`, counted from the bottom.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.words.get(index)
    }

    /// Words bottom to top.
    #[must_use]
    pub fn words(&self) -> &[Slot] {
        &self.words
    }

    /// Absolute position of the other half of a category-2 value at `index`, if any.
    #[must_use]
    pub fn partner(&self, index: usize) -> Option<usize> {
        let word = self.words.get(index)?;
        if word.value.is_category2() {
            return index.checked_sub(1);
        }
        if word.value == Value::Top
            && self
                .words
                .get(index + 1)
                .is_some_and(|upper| upper.value.is_category2())
        {
            return Some(index + 1);
        }
        None
    }

    /// Forgets `symbol` in every word.
    pub fn invalidate(&mut self, symbol: Symbol) {
        for word in &mut self.words {
            if word.value.symbol() == Some(symbol) {
                word.value = word.value.without_symbol(symbol);
            }
        }
    }

    /// Joins two stacks of equal height.
    ///
    /// # Errors
    ///
    /// Returns an error if the heights differ.
    pub fn try_join(&self, other: &Self) -> Result<Self> {
        if self.words.len() != other.words.len() {
            return Err(malformed_error!(
                "Stack heights differ at merge point: {} vs {}",
                self.words.len(),
                other.words.len()
            ));
        }
        Ok(TracedStack {
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a.join(b))
                .collect(),
        })
    }
}

impl fmt::Display for TracedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, word) in self.words.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{word}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category2_store_clobbers_neighbours() {
        let mut vars = TracedVariables::new(4);
        vars.store(0, Value::long(7), OriginSet::instruction(0)).unwrap();
        assert_eq!(vars.load(1).unwrap().value, Value::Top);

        vars.store(1, Value::int(1), OriginSet::instruction(3)).unwrap();
        assert_eq!(vars.load(0).unwrap().value, Value::Top);
        assert!(vars.store(3, Value::double(1.0), OriginSet::instruction(5)).is_err());
    }

    #[test]
    fn test_stack_words_and_partners() {
        let mut stack = TracedStack::new();
        stack.push(Value::int(1), OriginSet::instruction(0));
        stack.push(Value::long(2), OriginSet::instruction(1));
        assert_eq!(stack.size(), 3);
        assert_eq!(stack.partner(2), Some(1));
        assert_eq!(stack.partner(1), Some(2));
        assert_eq!(stack.partner(0), None);
        assert_eq!(stack.pop(2).unwrap(), Value::long(2));
        assert_eq!(stack.peek(0).unwrap().value, Value::int(1));
    }

    #[test]
    fn test_pop_kind_rejects_other_kinds() {
        let mut stack = TracedStack::new();
        stack.push(Value::float(1.5), OriginSet::instruction(0));
        assert!(stack.pop_kind(ComputationalType::Int).is_err());

        stack.push(Value::long(3), OriginSet::instruction(1));
        assert_eq!(stack.pop_kind(ComputationalType::Long).unwrap(), Value::long(3));
        assert_eq!(stack.size(), 0);
    }

    #[test]
    fn test_join_requires_equal_heights() {
        let mut a = TracedStack::new();
        a.push(Value::int(1), OriginSet::instruction(0));
        let mut b = TracedStack::new();
        b.push(Value::int(2), OriginSet::instruction(4));

        let joined = a.try_join(&b).unwrap();
        assert!(!joined.peek(0).unwrap().value.is_particular());
        assert_eq!(joined.peek(0).unwrap().producers.instructions().count(), 2);
        assert!(a.try_join(&TracedStack::new()).is_err());
    }
}
