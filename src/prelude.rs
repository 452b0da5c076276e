//! # dotpatch Prelude
//!
//! Re-exports the types needed to define methods, describe hooks, patch and run. Import it with
//! `use dotpatch::prelude::*;`.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpatch operations
pub use crate::Error;

/// The result type used throughout dotpatch
pub use crate::Result;

// ================================================================================================
// Method Metadata
// ================================================================================================

/// Method signatures as seen by the binder
pub use crate::metadata::method::{MethodDescriptor, ParameterInfo, TypeSig};

/// Method identifiers
pub use crate::metadata::token::Token;

// ================================================================================================
// Instruction Sequences
// ================================================================================================

/// Building method bodies with named labels
pub use crate::assembly::{InstructionAssembler, MethodBodyBuilder};

/// Editable method bodies
pub use crate::assembly::{ExceptionHandler, ExceptionHandlerFlags, IlCursor, MethodBody, OpCode};

// ================================================================================================
// Patching
// ================================================================================================

/// Hook descriptors
pub use crate::patch::{Hook, HookRole, HookSet, ReturnKind};

/// Installing and removing layers
pub use crate::patch::{DetourHost, PatchHandle, Patcher};

// ================================================================================================
// Execution
// ================================================================================================

/// The reference runtime
pub use crate::emulation::{EmulationConfig, EmulationLimits, Runtime};

/// Values crossing the runtime boundary
pub use crate::emulation::{CallOutcome, EmException, EmValue, NativeCall};
