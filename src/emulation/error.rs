//! Emulation error types.
//!
//! [`EmulationError`] covers failures of the interpreter itself: malformed stack usage, type
//! confusion, exhausted limits. Managed exceptions raised by IL code or hooks are not errors;
//! they travel as values and end up in [`crate::emulation::CallOutcome::Throw`].

use std::fmt;

use crate::metadata::token::Token;

/// Errors that can occur during emulation.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Evaluation stack underflow (pop from empty stack).
    StackUnderflow {
        /// Mnemonic of the instruction that popped.
        instruction: &'static str,
    },
    /// Type mismatch in operation.
    TypeMismatch {
        /// Operation being performed.
        operation: &'static str,
        /// Expected type.
        expected: &'static str,
        /// Actual type found.
        found: &'static str,
    },
    /// Local variable index out of bounds.
    LocalIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of locals available.
        count: usize,
    },
    /// Argument index out of bounds.
    ArgumentIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Number of arguments available.
        count: usize,
    },
    /// Wrong number of arguments passed to a method.
    ArgumentCountMismatch {
        /// Token of the called method.
        token: Token,
        /// Number of parameters the method declares.
        expected: usize,
        /// Number of arguments supplied.
        found: usize,
    },
    /// Invalid heap reference.
    InvalidHeapReference {
        /// The invalid reference ID.
        reference_id: u64,
    },
    /// Heap object limit exceeded.
    HeapLimitExceeded {
        /// Maximum allowed number of objects.
        limit: usize,
    },
    /// Field not present on a heap object.
    FieldNotFound {
        /// Type of the object.
        type_name: String,
        /// Name of the missing field.
        field: String,
    },
    /// Managed pointer to a frame or slot that no longer exists.
    DanglingPointer {
        /// Frame index the pointer refers to.
        frame: usize,
        /// Argument or local index.
        index: u16,
    },
    /// Method not found.
    MethodNotFound {
        /// Token of the missing method.
        token: Token,
    },
    /// Call depth limit exceeded.
    CallDepthExceeded {
        /// Current call depth.
        depth: usize,
        /// Maximum allowed depth.
        limit: usize,
    },
    /// Instruction count limit exceeded.
    InstructionLimitExceeded {
        /// Number of instructions executed.
        executed: u64,
        /// Maximum allowed.
        limit: u64,
    },
    /// Invalid operand for instruction.
    InvalidOperand {
        /// Instruction mnemonic.
        instruction: &'static str,
        /// Description of what was expected.
        expected: &'static str,
    },
    /// A native method returned a value it does not declare, or none although it declares one.
    NativeReturnMismatch {
        /// Name of the native method.
        name: String,
        /// Whether the method declares a return value.
        declared: bool,
    },
    /// `rethrow` outside a catch handler.
    RethrowOutsideHandler,
    /// `endfinally` without a pending finally block.
    EndFinallyOutsideHandler,
    /// Execution ran past the last instruction.
    FellThrough {
        /// Method whose body ended without a terminal instruction.
        token: Token,
    },
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::StackUnderflow { instruction } => {
                write!(f, "evaluation stack underflow in {instruction}")
            }
            EmulationError::TypeMismatch {
                operation,
                expected,
                found,
            } => {
                write!(
                    f,
                    "type mismatch in {operation}: expected {expected}, found {found}"
                )
            }
            EmulationError::LocalIndexOutOfBounds { index, count } => {
                write!(
                    f,
                    "local variable index {index} out of bounds (count: {count})"
                )
            }
            EmulationError::ArgumentIndexOutOfBounds { index, count } => {
                write!(f, "argument index {index} out of bounds (count: {count})")
            }
            EmulationError::ArgumentCountMismatch {
                token,
                expected,
                found,
            } => {
                write!(
                    f,
                    "method 0x{:08X} takes {expected} arguments, {found} supplied",
                    token.value()
                )
            }
            EmulationError::InvalidHeapReference { reference_id } => {
                write!(f, "invalid heap reference: {reference_id}")
            }
            EmulationError::HeapLimitExceeded { limit } => {
                write!(f, "heap object limit exceeded (limit: {limit})")
            }
            EmulationError::FieldNotFound { type_name, field } => {
                write!(f, "field '{field}' not found on {type_name}")
            }
            EmulationError::DanglingPointer { frame, index } => {
                write!(f, "dangling managed pointer: frame {frame}, slot {index}")
            }
            EmulationError::MethodNotFound { token } => {
                write!(f, "method not found: 0x{:08X}", token.value())
            }
            EmulationError::CallDepthExceeded { depth, limit } => {
                write!(f, "call depth exceeded: {depth} (limit: {limit})")
            }
            EmulationError::InstructionLimitExceeded { executed, limit } => {
                write!(f, "instruction limit exceeded: {executed} (limit: {limit})")
            }
            EmulationError::InvalidOperand {
                instruction,
                expected,
            } => {
                write!(f, "invalid operand for {instruction}: expected {expected}")
            }
            EmulationError::NativeReturnMismatch { name, declared } => {
                if *declared {
                    write!(f, "native method '{name}' returned no value")
                } else {
                    write!(f, "native method '{name}' returned a value it does not declare")
                }
            }
            EmulationError::RethrowOutsideHandler => write!(f, "rethrow outside a catch handler"),
            EmulationError::EndFinallyOutsideHandler => {
                write!(f, "endfinally outside a finally handler")
            }
            EmulationError::FellThrough { token } => {
                write!(
                    f,
                    "execution fell off the end of method 0x{:08X}",
                    token.value()
                )
            }
        }
    }
}

impl std::error::Error for EmulationError {}
