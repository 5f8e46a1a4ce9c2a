//! Shared utilities.
//!
//! - [`BitSet`] - compact per-offset mark sets used by the evaluator and the simplifier

mod bitset;

pub use bitset::{BitSet, BitSetIter};
