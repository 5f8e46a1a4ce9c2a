//! Optimization passes over a class pool.
//!
//! This module ties the [`evaluation`](crate::evaluation) results to code changes. The
//! central piece is the [`EvaluationSimplifier`], which removes everything the partial
//! evaluator proved to be without effect on the observable behaviour of a method: constant
//! computations, redundant loads, decided branches, unreachable code and dead exception
//! handlers. Around it sit a [`SideEffectChecker`] deciding what must stay, structural
//! [`finalizers`] that tighten class and method declarations, and the [`Optimizer`] that
//! drives everything over a [`ClassPool`](crate::classfile::ClassPool).
//!
//! # Key Components
//!
//! - [`Optimizer`] - Links, runs the finalizers and repeats evaluation rounds
//! - [`OptimizerConfig`] / [`SimplifierOptions`] - Which passes and rewrites run
//! - [`KeepMarker`] - Classes and members that must not change
//! - [`SideEffectChecker`] - Instructions that are necessary on their own
//! - [`EvaluationSimplifier`] - Per-method rewriting, reporting a [`SimplificationReport`]
//! - [`OptimizationStats`] - Aggregated results of a run
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use classopt::prelude::*;
//!
//! # fn example(mut pool: ClassPool) -> classopt::Result<()> {
//! let config = OptimizerConfig {
//!     passes: 3,
//!     parallel: true,
//!     ..OptimizerConfig::default()
//! }
//! .assume_no_side_effects("java/lang/Math", "abs", "(I)I");
//!
//! let stats = Optimizer::new(config, KeepMarker::new()).optimize(&mut pool)?;
//! println!("{stats}");
//! # Ok(())
//! # }
//! ```

mod config;
pub mod finalizers;
mod keep;
mod optimizer;
mod side_effects;
mod simplifier;
mod stats;

pub use config::{OptimizerConfig, SimplifierOptions};
pub use keep::KeepMarker;
pub use optimizer::Optimizer;
pub use side_effects::SideEffectChecker;
pub use simplifier::{EvaluationSimplifier, SimplificationReport};
pub use stats::OptimizationStats;
