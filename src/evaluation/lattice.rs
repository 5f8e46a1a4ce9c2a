//! Join semi-lattice trait for the evaluator's abstract domain.
//!
//! Every piece of state the partial evaluator records per offset (values, producer sets,
//! variable frames and stacks) merges at control flow joins through [`JoinSemiLattice::join`].
//! The evaluator relies on the following properties for termination:
//!
//! - **Idempotent**: `x.join(x) = x`
//! - **Commutative**: `x.join(y) = y.join(x)`
//! - **Associative**: `x.join(y.join(z)) = (x.join(y)).join(z)`
//! - **Finite height**: a value can only lose precision a bounded number of times
//!
//! Joining never increases precision: the result describes every concrete state either input
//! describes.

use std::fmt::Debug;

use crate::utils::BitSet;

/// A join semi-lattice with a join (least upper bound) operation.
pub trait JoinSemiLattice: Clone + Debug + PartialEq {
    /// Computes the join (least upper bound) of two lattice elements.
    #[must_use]
    fn join(&self, other: &Self) -> Self;

    /// Joins `other` into `self`, returning `true` if `self` changed.
    fn join_with(&mut self, other: &Self) -> bool {
        let joined = self.join(other);
        if joined == *self {
            false
        } else {
            *self = joined;
            true
        }
    }
}

impl JoinSemiLattice for BitSet {
    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }

    fn join_with(&mut self, other: &Self) -> bool {
        self.union_with(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_join_is_union() {
        let mut a = BitSet::new(8);
        a.insert(1);
        let mut b = BitSet::new(8);
        b.insert(5);

        assert!(a.join_with(&b));
        assert!(!a.join_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 5]);
    }
}
