//! The `Code` attribute of a method.

use crate::{
    assembly::{decode_all, Instruction},
    Result,
};

/// One entry of the exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First protected offset (inclusive)
    pub start_pc: u32,
    /// End of the protected range (exclusive)
    pub end_pc: u32,
    /// Offset of the handler code
    pub handler_pc: u32,
    /// Class constant of the caught type, 0 for `finally`-style handlers
    pub catch_type: u16,
}

impl ExceptionHandler {
    /// Returns `true` if `offset` lies in the protected range.
    #[must_use]
    pub fn covers(&self, offset: u32) -> bool {
        self.start_pc <= offset && offset < self.end_pc
    }
}

/// One entry of the `LineNumberTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First offset belonging to the line
    pub start_pc: u32,
    /// Source line number
    pub line: u16,
}

/// One entry of the `LocalVariableTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    /// First offset at which the variable is live
    pub start_pc: u32,
    /// Length of the live range in bytes
    pub length: u32,
    /// `Utf8` index of the variable name
    pub name_index: u16,
    /// `Utf8` index of the field descriptor
    pub descriptor_index: u16,
    /// Local variable slot
    pub index: u16,
}

/// The `Code` attribute: bytecode plus all offset-dependent tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth, in slots
    pub max_stack: u16,
    /// Number of local variable slots, including parameters
    pub max_locals: u16,
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Exception handlers in priority order
    pub exception_table: Vec<ExceptionHandler>,
    /// Line number table
    pub line_numbers: Vec<LineNumber>,
    /// Local variable table
    pub local_variables: Vec<LocalVariable>,
}

impl CodeAttribute {
    /// Creates a code attribute with empty tables.
    #[must_use]
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            ..Self::default()
        }
    }

    /// Decodes the whole instruction stream as `(offset, instruction)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytecode cannot be decoded.
    pub fn instructions(&self) -> Result<Vec<(usize, Instruction)>> {
        decode_all(&self.code)
    }

    /// Length of the bytecode in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns `true` if the method body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}
