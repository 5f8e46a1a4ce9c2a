//! JVM bytecode decoding, encoding and editing.
//!
//! This module owns everything that works on raw method bodies: the opcode table, the typed
//! [`Instruction`] model with its encoder, the [`decode_instruction`] decoder, the
//! [`InstructionAssembler`] used to build bodies from labels, the atomic
//! [`CodeAttributeEditor`], and the [`StackSizeComputer`].
//!
//! # Architecture
//!
//! Instructions never carry absolute offsets. Branch operands are displacements relative to
//! the instruction's own offset, so instructions can be decoded, inspected and re-encoded at a
//! different position by the editor without losing their meaning.
//!
//! # Key Components
//!
//! - [`opcodes`] - Opcode constants and mnemonics
//! - [`Instruction`] / [`Operand`] - Decoded instructions
//! - [`decode_instruction`] / [`decode_all`] - Decoding
//! - [`InstructionAssembler`] - Building bodies with labels
//! - [`CodeAttributeEditor`] - Atomic insert/replace/delete with branch fix-up
//! - [`StackSizeComputer`] - Stack height and `max_stack` computation

pub mod opcodes;

mod assembler;
mod decoder;
mod editor;
mod instruction;
mod parser;
mod stacksize;

pub use assembler::InstructionAssembler;
pub use decoder::{decode_all, decode_instruction};
pub use editor::CodeAttributeEditor;
pub use instruction::{FlowType, Instruction, LocalAccess, Operand, StackEffect, StackMove};
pub use parser::Parser;
pub use stacksize::StackSizeComputer;
