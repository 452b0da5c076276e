//! Method metadata used by the rewriting engine.
//!
//! # Key Components
//!
//! - [`token`] - Metadata tokens identifying callable methods
//! - [`method`] - Method descriptors, parameter information and type signatures
//!
//! The metadata here is read-only from the point of view of the rewriting engine. A
//! [`crate::patch::DetourHost`] produces a [`method::MethodDescriptor`] for every method it can
//! patch, and the engine derives argument slots and the binding table from it.

pub mod method;
pub mod token;
