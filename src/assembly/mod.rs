//! Instruction sequences: the editable representation of method bodies.
//!
//! This module provides the data model the rewriting engine manipulates. A method body is an
//! ordered list of stack-machine instructions (a subset of CIL) with symbolic branch targets,
//! local variables and exception handling regions.
//!
//! # Architecture
//!
//! - **Instructions** are identified by a stable [`InstrId`]. Labels and exception regions refer
//!   to ids, so splicing code into a body never silently shifts a branch target.
//! - **Labels** are indirections: a branch names a [`Label`], and the body's label table maps
//!   it to an instruction. Moving a label (see [`MethodBody::retarget`]) redirects every branch
//!   that uses it.
//! - **Cursors** ([`IlCursor`]) insert code in front of a position, the way a hook injector
//!   wants to work.
//! - **Builders** ([`MethodBodyBuilder`], [`InstructionAssembler`]) assemble bodies from
//!   scratch with named labels.
//!
//! # Key Components
//!
//! - [`OpCode`] - Supported instruction set with mnemonic, operand and flow metadata
//! - [`Instruction`], [`Operand`], [`Immediate`] - Instruction representation
//! - [`MethodBody`] - Instructions, locals, labels and exception handlers
//! - [`ExceptionHandler`] - Protected regions and their handlers
//! - [`IlCursor`] - Insertion cursor
//! - [`MethodBodyBuilder`] - Fluent body construction

mod body;
mod builder;
mod cursor;
mod display;
mod exceptions;
mod instruction;
mod opcodes;

pub use body::{LocalVariable, MethodBody};
pub use builder::{InstructionAssembler, MethodBodyBuilder};
pub use cursor::IlCursor;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use instruction::{
    FlowType, Immediate, InstrId, Instruction, Label, Operand, OperandType, StackBehavior,
};
pub use opcodes::OpCode;
