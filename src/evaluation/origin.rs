//! Instruction offset sets and producer sets.

use std::fmt;

use crate::evaluation::JoinSemiLattice;

/// A small sorted set of bytecode offsets.
///
/// Used for branch targets and origins, and as the value of return addresses. The sets are
/// tiny in practice (a handful of successors), so a sorted vector beats hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OffsetSet(Vec<u32>);

impl OffsetSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding one offset.
    #[must_use]
    pub fn single(offset: usize) -> Self {
        OffsetSet(vec![offset as u32])
    }

    /// Adds an offset, returning `true` if it was not present.
    pub fn insert(&mut self, offset: usize) -> bool {
        let offset = offset as u32;
        match self.0.binary_search(&offset) {
            Ok(_) => false,
            Err(at) => {
                self.0.insert(at, offset);
                true
            }
        }
    }

    /// Returns `true` if `offset` is in the set.
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        u32::try_from(offset).is_ok_and(|o| self.0.binary_search(&o).is_ok())
    }

    /// Number of offsets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().map(|&o| o as usize)
    }

    /// The only offset of a one-element set.
    #[must_use]
    pub fn single_offset(&self) -> Option<usize> {
        match self.0.as_slice() {
            [only] => Some(*only as usize),
            _ => None,
        }
    }
}

impl JoinSemiLattice for OffsetSet {
    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for offset in other.iter() {
            result.insert(offset);
        }
        result
    }
}

impl fmt::Display for OffsetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, offset) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{offset}")?;
        }
        f.write_str("}")
    }
}

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// Parameters and uninitialized locals at method entry
    MethodEntry,
    /// The caught exception pushed at the handler at this offset
    ExceptionHandler(u32),
    /// The instruction at this offset
    Instruction(u32),
}

impl Origin {
    /// The instruction offset, if the origin is an instruction.
    #[must_use]
    pub fn instruction(&self) -> Option<usize> {
        match self {
            Origin::Instruction(offset) => Some(*offset as usize),
            _ => None,
        }
    }
}

/// The set of origins of a stack word or variable slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OriginSet(Vec<Origin>);

impl OriginSet {
    /// A set holding one origin.
    #[must_use]
    pub fn single(origin: Origin) -> Self {
        OriginSet(vec![origin])
    }

    /// The origin set of a value produced by the instruction at `offset`.
    #[must_use]
    pub fn instruction(offset: usize) -> Self {
        Self::single(Origin::Instruction(offset as u32))
    }

    /// Origins in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Origin> + '_ {
        self.0.iter().copied()
    }

    /// Instruction offsets among the origins.
    pub fn instructions(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().filter_map(Origin::instruction)
    }

    /// Returns `true` if `origin` is in the set.
    #[must_use]
    pub fn contains(&self, origin: Origin) -> bool {
        self.0.binary_search(&origin).is_ok()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl JoinSemiLattice for OriginSet {
    fn join(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().copied());
        merged.sort_unstable();
        merged.dedup();
        OriginSet(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_set_stays_sorted() {
        let mut set = OffsetSet::new();
        assert!(set.insert(9));
        assert!(set.insert(2));
        assert!(!set.insert(9));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 9]);
        assert_eq!(set.single_offset(), None);
        assert_eq!(set.to_string(), "{2,9}");
        assert_eq!(OffsetSet::single(4).single_offset(), Some(4));
    }

    #[test]
    fn test_origin_join_is_union() {
        let a = OriginSet::instruction(4);
        let b = OriginSet::single(Origin::MethodEntry);
        let joined = a.join(&b);
        assert!(joined.contains(Origin::MethodEntry));
        assert_eq!(joined.instructions().collect::<Vec<_>>(), vec![4]);
        assert_eq!(joined, b.join(&a));
    }
}
