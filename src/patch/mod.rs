//! The rewriting engine: prefix, postfix and finalizer hooks.
//!
//! Patching a method rewrites its instruction sequence so that externally supplied hooks run
//! around the original code:
//!
//! - **Prefixes** run first. A prefix returning `bool` can skip the original body (and the
//!   postfixes) by returning `false`.
//! - **Postfixes** run after the original body on the normal return path and may read or
//!   replace the return value through `__result`.
//! - **Finalizers** run on every exit. They see the exception (if any) through `__exception`
//!   and may suppress it, keep it or replace it.
//!
//! Hooks receive data by parameter *name*; see [`binder`] for the rules.
//!
//! # Architecture
//!
//! ```text
//! Patcher::patch ─► DetourHost::describe ─► bind (all hooks, no mutation)
//!                ─► DetourHost::import_hook ─► RewriteSession
//!                ─► DetourHost::install ─► RewriteSession::manipulate(&mut MethodBody)
//!                                             ├─ prefix::inject_prefixes
//!                                             ├─ postfix::inject_postfixes
//!                                             └─ finalizer::inject_finalizers
//! ```
//!
//! Every `patch` call is one independent layer. Layers are removed individually with
//! [`Patcher::unpatch`] or all at once, most recent first, with [`Patcher::dispose_all`].
//!
//! # Key Components
//!
//! - [`Patcher`] - Registration point and layer bookkeeping
//! - [`Hook`], [`HookSet`] - Hook descriptors
//! - [`RewriteSession`] - The manipulator installed for one layer
//! - [`DetourHost`], [`Manipulator`] - Boundary to the owner of method bodies

pub mod binder;
mod chain;
mod facade;
mod finalizer;
mod hook;
mod host;
mod postfix;
mod prefix;
mod session;

pub use binder::{
    bind, BindingError, ParameterTable, ResolvedArgument, EXCEPTION_PARAM, INSTANCE_PARAM,
    RESULT_PARAM,
};
pub use chain::BoundHook;
pub use facade::{PatchHandle, Patcher};
pub use hook::{Hook, HookParameter, HookRole, HookSet, NativeFn, ReturnKind};
pub use host::{DetourHost, DetourId, Manipulator};
pub use session::RewriteSession;
