//! Symbolic partial evaluation of method bodies.
//!
//! This module computes, for every instruction of a method, the abstract local variables and
//! operand stack before and after it, which instructions may have produced each stack word and
//! variable, which instructions are reachable and where control flows.
//!
//! # Key Components
//!
//! - [`Value`] - the abstract value lattice: unknown, specific (symbolic identity) or particular
//! - [`OriginSet`] - the producers of a stack word or variable slot
//! - [`TracedVariables`] / [`TracedStack`] - abstract frames with producer tracking
//! - [`InvocationUnit`] - interprocedural knowledge about parameters, fields and return values
//! - [`PartialEvaluator`] - the worklist fixpoint, producing an [`Evaluation`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use classopt::prelude::*;
//!
//! # fn example(pool: &ClassPool) -> classopt::Result<()> {
//! let class = pool.get("com/example/Main").unwrap();
//! let method = class.method("run", "()I").unwrap();
//! let code = method.code.as_ref().unwrap();
//!
//! let evaluation = PartialEvaluator::new(&BasicInvocationUnit).evaluate(
//!     &class.constant_pool,
//!     &class.name,
//!     method,
//!     code,
//! )?;
//! for (offset, instruction) in evaluation.instructions() {
//!     if !evaluation.is_traced(offset) {
//!         println!("unreachable: {offset} {instruction}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod evaluator;
mod invocation;
mod lattice;
mod origin;
mod processor;
mod state;
mod value;

pub use evaluator::{Evaluation, PartialEvaluator, ValueFactory, DEFAULT_MAX_VISITS};
pub use invocation::{BasicInvocationUnit, InvocationUnit, SeededInvocationUnit};
pub use lattice::JoinSemiLattice;
pub use origin::{OffsetSet, Origin, OriginSet};
pub use state::{Slot, TracedStack, TracedVariables};
pub use value::{Abstract, Precision, ReferenceValue, Symbol, Value};
