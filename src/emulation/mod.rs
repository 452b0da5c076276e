//! Reference runtime for patched methods.
//!
//! The `emulation` module hosts IL methods and native (Rust closure) methods and executes them
//! with an interpreter for the instruction set of [`crate::assembly`]. Its [`Runtime`]
//! implements [`crate::patch::DetourHost`], which makes it the vehicle for running patched code
//! end to end.
//!
//! # Architecture
//!
//! ```text
//! Runtime (DetourHost)
//!   ├─ method table: pristine body + layers ─► loader ─► LoadedMethod
//!   ├─ native table: NativeMethod (hooks, helpers)
//!   ├─ ManagedHeap, console sink
//!   └─ invoke ─► Interpreter (frames, exception dispatch) ─► CallOutcome
//! ```
//!
//! # Key Components
//!
//! - [`Runtime`] - Method table, layering and invocation
//! - [`EmValue`] - Runtime values
//! - [`NativeCall`] - What a native method sees of the runtime
//! - [`ManagedHeap`] - Objects with named fields
//! - [`EmulationConfig`] / [`EmulationLimits`] - Limits and settings
//! - [`EmulationError`] - Interpreter failures
//!
//! Managed exceptions are values, not errors: a method that throws completes with
//! [`CallOutcome::Throw`].
//!
//! Not a complete CLR: there are no generics, no virtual dispatch and no threads.

mod config;
mod error;
mod frame;
mod heap;
mod interpreter;
mod loader;
mod native;
mod runtime;
mod value;

pub use config::{EmulationConfig, EmulationLimits};
pub use error::EmulationError;
pub use heap::{HeapObject, ManagedHeap};
pub use loader::LoadedMethod;
pub use native::{NativeCall, NativeMethod};
pub use runtime::Runtime;
pub use value::{
    CallOutcome, EmException, EmValue, HeapRef, ManagedPointer, PointerTarget, DIVIDE_BY_ZERO,
    NULL_REFERENCE,
};

