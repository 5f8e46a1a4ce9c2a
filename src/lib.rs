// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # classopt
//!
//! A whole-program bytecode optimizer for JVM class files, built around partial evaluation.
//!
//! `classopt` operates on an in-memory class-file object model (classes, members, constant
//! pools and `Code` attributes). For every method body it runs an abstract interpreter that
//! traces all reachable instructions to a fixpoint, then uses the per-offset facts to fold
//! constants, alias loads, collapse decided branches, delete dead instructions and repair the
//! operand stack around every deletion. Edits are staged and committed atomically; a method
//! whose analysis fails is left byte-for-byte unchanged.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use classopt::prelude::*;
//!
//! let mut pool = ClassPool::new();
//! // ... populate the pool with program and library classes ...
//!
//! let optimizer = Optimizer::new(OptimizerConfig::default(), KeepMarker::default());
//! let stats = optimizer.optimize(&mut pool)?;
//! println!("{stats}");
//! # Ok::<(), classopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] - Class pool, classes, members, constant pool, descriptors, hierarchy
//! - [`assembly`] - Opcode table, instruction codec, assembler, code attribute editor
//! - [`evaluation`] - Value lattice, traced variables and stack, partial evaluator
//! - [`optimize`] - Evaluation simplifier, structural finalizers and the optimizer driver
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! The library reports through the [`log`] facade and never installs a logger. Methods that
//! are skipped because their analysis failed are reported with `warn!`, per-method edit
//! summaries with `debug!`.

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use classopt::prelude::*;
///
/// let config = OptimizerConfig::default();
/// assert!(config.conservative);
/// ```
pub mod prelude;

/// The in-memory class-file object model.
///
/// Everything the optimizer reads and mutates lives here: the [`classfile::ClassPool`],
/// its [`classfile::ProgramClass`]es with their [`classfile::ConstantPool`], members and
/// [`classfile::CodeAttribute`]s, plus the immutable [`classfile::ClassHierarchy`] snapshot
/// used by the side-effect checker and the finalizers.
pub mod classfile;

/// JVM instruction handling.
///
/// Opcode constants and metadata, decoding and encoding of single instructions, the
/// label-based [`assembly::InstructionAssembler`], the [`assembly::CodeAttributeEditor`]
/// that commits per-offset edits atomically, and the [`assembly::StackSizeComputer`].
pub mod assembly;

/// Partial evaluation of method bodies.
///
/// The [`evaluation::Value`] lattice, traced variables and stack, invocation units and the
/// [`evaluation::PartialEvaluator`] which produces an [`evaluation::Evaluation`] per method.
pub mod evaluation;

/// Optimization passes built on top of the evaluator and the class hierarchy.
pub mod optimize;

/// Shared utilities.
pub mod utils;

/// `classopt` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use classopt::{assembly::decode_instruction, Error};
///
/// match decode_instruction(&[0xCB], 0) {
///     Ok(instruction) => println!("{instruction}"),
///     Err(Error::InvalidOpcode(op)) => println!("unknown opcode {op:#04x}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;

/// `classopt` Result type
pub type Result<T> = std::result::Result<T, Error>;
