// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dotpatch
//!
//! Runtime method patching for CIL. `dotpatch` rewrites the instruction sequence of a method so
//! that externally supplied hooks run around the original code:
//!
//! - **Prefixes** run before the original body and can skip it
//! - **Postfixes** run after it and can read or replace the return value
//! - **Finalizers** run on every exit and can observe, suppress or replace an exception
//!
//! Hooks receive their data by parameter name: original parameters by their own names,
//! `__instance` for the receiver, `__result` for the return value and `__exception` for the
//! in-flight exception.
//!
//! ## Quick Start
//!
//! ```rust
//! use dotpatch::prelude::*;
//!
//! let mut runtime = Runtime::new();
//! let add = runtime.define_method(
//!     MethodDescriptor::new("Add", "Calculator")
//!         .param("a", TypeSig::I32)
//!         .param("b", TypeSig::I32)
//!         .returns(TypeSig::I32),
//!     MethodBodyBuilder::new()
//!         .implementation(|asm| {
//!             asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
//!             Ok(())
//!         })
//!         .build()?,
//! )?;
//!
//! // void Prefix(int a, int b) => Log($"{a} + {b}");
//! let trace = Hook::new("Trace", |call| {
//!     let (a, b) = (call.arg(0)?.as_i32()?, call.arg(1)?.as_i32()?);
//!     call.write_line(format!("{a} + {b}"));
//!     Ok(CallOutcome::Return(None))
//! })
//! .param("a")
//! .param("b");
//!
//! let mut patcher = Patcher::new(runtime);
//! patcher.patch(add, HookSet::new().prefix(trace))?;
//!
//! let outcome = patcher.host_mut().invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
//! assert_eq!(outcome.value(), Some(&EmValue::I32(6)));
//! assert_eq!(patcher.host().console(), ["4 + 2"]);
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`metadata`] - Method descriptors, type signatures and tokens
//! - [`assembly`] - Editable method bodies, labels, exception regions and a cursor over them
//! - [`patch`] - Binding, the rewrite itself and the [`patch::Patcher`] facade
//! - [`emulation`] - A reference runtime that hosts methods and executes patched bodies
//! - [`Error`] and [`Result`] - Error handling
//!
//! The rewriting engine only depends on the [`patch::DetourHost`] trait; [`emulation::Runtime`]
//! is one implementation of it.

#[macro_use]
pub(crate) mod error;

pub mod assembly;
pub mod emulation;
pub mod metadata;
pub mod patch;
pub mod prelude;

#[cfg(test)]
mod test;

/// `dotpatch` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpatch` Error type
///
/// Every fallible operation of the crate returns this type, including native methods and hooks
/// running inside the [`emulation::Runtime`].
///
/// # Example
///
/// ```rust
/// use dotpatch::{metadata::token::Token, prelude::*};
///
/// let mut patcher = Patcher::new(Runtime::new());
/// match patcher.patch(Token::new(0x0600_0042), HookSet::new()) {
///     Err(Error::MethodNotFound(token)) => assert_eq!(token, Token::new(0x0600_0042)),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub use error::Error;
