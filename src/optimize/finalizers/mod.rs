//! Structural passes over the whole class pool.
//!
//! These passes tighten declarations once the complete program is known, which in turn
//! gives the evaluation simplifier more to work with: a `final` class or a `private`
//! method has a single implementation, and an interface with one implementation can be
//! replaced by it.
//!
//! Each pass implements [`ClassPass`] and is run by the
//! [`Optimizer`](crate::optimize::Optimizer) before any method is evaluated, against a
//! fresh [`ClassHierarchy`] snapshot. Classes and members marked in the [`KeepMarker`] are
//! never changed.
//!
//! | Pass | Effect |
//! |------|--------|
//! | [`ClassFinalizer`] | Leaf classes become `final` |
//! | [`MethodPrivatizer`] | Methods only used by their own class become `private` |
//! | [`SingleImplementationInliner`] | Interfaces with one implementation are replaced by it |

mod class_final;
mod privatize;
mod single_impl;

pub use class_final::ClassFinalizer;
pub use privatize::MethodPrivatizer;
pub use single_impl::SingleImplementationInliner;

use crate::{
    classfile::{ClassHierarchy, ClassPool},
    optimize::KeepMarker,
    Result,
};

/// A pass that rewrites declarations across the class pool.
///
/// Passes must be thread-safe so that a configured pipeline can be shared between
/// optimizer instances.
pub trait ClassPass: Send + Sync {
    /// Unique name for logging and statistics.
    fn name(&self) -> &'static str;

    /// Short description of the pass.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Runs the pass.
    ///
    /// # Arguments
    ///
    /// * `pool` - The classes to rewrite.
    /// * `hierarchy` - A snapshot of `pool` taken before the pass.
    /// * `keep` - Classes and members that must not change.
    ///
    /// # Returns
    ///
    /// The number of classes or members changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a constant pool or method body can not be rewritten. The pool
    /// may be partially rewritten by then.
    fn run(&self, pool: &mut ClassPool, hierarchy: &ClassHierarchy, keep: &KeepMarker)
        -> Result<usize>;
}
