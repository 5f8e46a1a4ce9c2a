//! A bit vector indexed by bytecode offset.
//!
//! The evaluator and the simplifier keep one flag per byte offset of a method body (traced,
//! necessary, simplified, ...). Offsets are dense and small, so a word-packed bit vector is
//! both the cheapest representation and the one that supports the range queries the
//! simplifier needs (does any necessary instruction lie between a branch and its target?).
//!
//! # Example
//!
//! ```rust
//! use classopt::utils::BitSet;
//!
//! let mut necessary = BitSet::new(16);
//! necessary.insert(3);
//! necessary.insert(9);
//!
//! assert!(necessary.any_in_range(4..10));
//! assert!(!necessary.any_in_range(4..9));
//! assert_eq!(necessary.iter().collect::<Vec<_>>(), vec![3, 9]);
//! ```

use std::ops::Range;

/// A fixed-capacity bit vector.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// The number of bits in the set.
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns the capacity of this bit set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Clears all bits and resizes the set to `capacity`, reusing the allocation.
    pub fn reset(&mut self, capacity: usize) {
        self.words.clear();
        self.words.resize(capacity.div_ceil(64), 0);
        self.len = capacity;
    }

    /// Sets the bit at the given index, returning `true` if it was not set before.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Clears the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    /// Returns `true` if the bit at the given index is set.
    ///
    /// Indices beyond the capacity are reported as unset, which lets callers probe
    /// offsets one past the end of a method body.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if any bit in `range` is set. The range is clamped to the capacity.
    #[must_use]
    pub fn any_in_range(&self, range: Range<usize>) -> bool {
        let end = range.end.min(self.len);
        let mut index = range.start;
        while index < end {
            let word = self.words[index / 64] >> (index % 64);
            let span = (64 - index % 64).min(end - index);
            let mask = if span == 64 { u64::MAX } else { (1u64 << span) - 1 };
            if word & mask != 0 {
                return true;
            }
            index += span;
        }
        false
    }

    /// Computes the union with another bit set (in place).
    ///
    /// Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns an iterator over the indices of set bits, in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits in a `BitSet`.
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.set.words.get(self.word_idx)?;
        }
    }
}
