use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Structural Errors
/// - [`Error::Malformed`] - Invalid bytecode or class-file structure
/// - [`Error::InvalidOpcode`] - Unknown opcode byte
/// - [`Error::InvalidBranch`] - Branch or switch target outside the instruction stream
/// - [`Error::ConstantPoolIndex`] - Constant pool index out of range or of the wrong kind
/// - [`Error::InvalidDescriptor`] - Unparseable field or method descriptor
///
/// ## Assembly Errors
/// - [`Error::UndefinedLabel`] / [`Error::DuplicateLabel`] - Assembler label misuse
/// - [`Error::BranchOffsetOverflow`] - A conditional branch no longer fits its 16-bit offset
///
/// ## Analysis Errors
/// These are fatal for the method being optimized only; the driver leaves that method
/// untouched and continues with the rest of the class pool.
/// - [`Error::UnsupportedStackMove`] - No dup/swap sequence reproduces the needed stack shape
/// - [`Error::EvaluationLimit`] - The evaluator exceeded its per-instruction visit budget
/// - [`Error::MethodPanicked`] - A panic was caught at the method boundary
///
/// # Examples
///
/// ```rust
/// use classopt::{assembly::decode_instruction, Error};
///
/// // `bipush` without its operand byte
/// match decode_instruction(&[0x10], 0) {
///     Err(Error::Malformed { message, .. }) => println!("{message}"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode or class structure is damaged and could not be processed.
    ///
    /// Includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An opcode byte that is not part of the JVM instruction set.
    #[error("Invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    /// A branch or switch target does not land on an instruction boundary.
    #[error("Branch from offset {origin} targets invalid offset {target}")]
    InvalidBranch {
        /// Offset of the branching instruction
        origin: usize,
        /// The computed absolute target
        target: i64,
    },

    /// A constant pool index is zero, out of range, or refers to an unexpected entry kind.
    #[error("Invalid constant pool index {index}: {reason}")]
    ConstantPoolIndex {
        /// The offending index
        index: u16,
        /// What was expected at that index
        reason: &'static str,
    },

    /// A field or method descriptor could not be parsed.
    #[error("Invalid descriptor '{0}'")]
    InvalidDescriptor(String),

    /// An assembler branch refers to a label that was never defined.
    #[error("Undefined label '{0}'")]
    UndefinedLabel(String),

    /// An assembler label was defined twice.
    #[error("Duplicate label '{0}'")]
    DuplicateLabel(String),

    /// A conditional branch offset no longer fits in 16 bits after layout.
    #[error("Branch at offset {offset} needs displacement {displacement}, which does not fit")]
    BranchOffsetOverflow {
        /// New offset of the branching instruction
        offset: usize,
        /// The required displacement
        displacement: i64,
    },

    /// The stack fix-up found no dup/swap sequence producing the required stack layout.
    #[error("Unsupported stack move for {mnemonic} at offset {offset}")]
    UnsupportedStackMove {
        /// Offset of the dup-family instruction
        offset: usize,
        /// Mnemonic of the dup-family instruction
        mnemonic: &'static str,
    },

    /// The evaluator visited an instruction more often than the configured budget allows.
    ///
    /// The value lattice has finite height, so this points at a monotonicity defect rather
    /// than at a property of the input.
    #[error("Evaluation exceeded {limit} visits at offset {offset}")]
    EvaluationLimit {
        /// Offset that exceeded the budget
        offset: usize,
        /// The configured budget
        limit: usize,
    },

    /// A panic was caught while optimizing a single method.
    #[error("Panic while processing {0}")]
    MethodPanicked(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
