//! # classopt Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the classopt library. Import this module to get quick access to the essential
//! types for loading a class pool into memory, evaluating method bodies and optimizing them.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all classopt operations
pub use crate::Error;

/// The result type used throughout classopt
pub use crate::Result;

// ================================================================================================
// Class-File Object Model
// ================================================================================================

/// Classes, members and the pool holding them
pub use crate::classfile::{ClassPool, ProgramClass, ProgramField, ProgramMethod};

/// Access flags
pub use crate::classfile::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

/// Constant pool and member references
pub use crate::classfile::{Constant, ConstantPool, MemberKind, MemberRef};

/// Method bodies
pub use crate::classfile::{CodeAttribute, ExceptionHandler};

/// Descriptors
pub use crate::classfile::{ComputationalType, FieldType, MethodDescriptor};

/// Hierarchy snapshot and reference linking
pub use crate::classfile::{ClassHierarchy, Diagnostics, Linker};

// ================================================================================================
// Bytecode
// ================================================================================================

/// Instruction model
pub use crate::assembly::{FlowType, Instruction, Operand};

/// Building and editing method bodies
pub use crate::assembly::{CodeAttributeEditor, InstructionAssembler};

/// Decoding
pub use crate::assembly::{decode_all, decode_instruction};

// ================================================================================================
// Partial Evaluation
// ================================================================================================

/// The evaluator and its per-offset results
pub use crate::evaluation::{Evaluation, PartialEvaluator};

/// Abstract values
pub use crate::evaluation::{Symbol, Value};

/// Interprocedural value sources
pub use crate::evaluation::{BasicInvocationUnit, InvocationUnit, SeededInvocationUnit};

// ================================================================================================
// Optimization
// ================================================================================================

/// Driver, configuration and statistics
pub use crate::optimize::{KeepMarker, OptimizationStats, Optimizer, OptimizerConfig};

/// Method body simplification
pub use crate::optimize::{
    EvaluationSimplifier, SideEffectChecker, SimplificationReport, SimplifierOptions,
};

/// Structural passes
pub use crate::optimize::finalizers::{
    ClassFinalizer, ClassPass, MethodPrivatizer, SingleImplementationInliner,
};
