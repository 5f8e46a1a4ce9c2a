//! In-memory class-file object model.
//!
//! # Key Components
//!
//! - [`ClassPool`] - all program and library classes, looked up by internal name
//! - [`ProgramClass`], [`ProgramMethod`], [`ProgramField`] - classes and their members
//! - [`ConstantPool`] / [`Constant`] - 1-based constant pool with find-or-add helpers
//! - [`CodeAttribute`] - bytecode, exception table, line numbers and local variables
//! - [`FieldType`] / [`MethodDescriptor`] - parsed descriptors
//! - [`ClassHierarchy`] - immutable snapshot used while classes are being mutated
//! - [`Linker`] / [`Diagnostics`] - reporting of unresolved references
//!
//! Reading and writing the binary class-file format is not part of this crate; callers build
//! the model from whatever class-file reader they use.

mod access;
mod class;
mod code;
mod constants;
mod descriptor;
mod hierarchy;
mod linker;

pub use access::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
pub use class::{ClassPool, ProgramClass, ProgramField, ProgramMethod};
pub use code::{CodeAttribute, ExceptionHandler, LineNumber, LocalVariable};
pub use constants::{Constant, ConstantPool, MemberKind, MemberRef};
pub use descriptor::{retarget_descriptor, ComputationalType, FieldType, MethodDescriptor};
pub use hierarchy::{ClassHierarchy, ClassInfo, FieldInfo, MethodInfo, ResolvedMember};
pub use linker::{Diagnostics, Linker};
