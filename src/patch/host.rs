//! The boundary between the rewriting engine and whatever runs the code.
//!
//! The engine never owns method bodies. A [`DetourHost`] describes methods, turns hooks into
//! callable tokens and applies [`Manipulator`]s to the bodies it owns. The crate ships one host,
//! [`crate::emulation::Runtime`]; an embedding that patches a real process implements the same
//! trait on top of its detour mechanism.

use std::{fmt, sync::Arc};

use crate::{
    assembly::MethodBody,
    metadata::{method::MethodDescriptor, token::Token},
    patch::hook::Hook,
    Result,
};

/// Identifies one installed layer on a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DetourId(pub u64);

impl fmt::Display for DetourId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transformation of a method body.
///
/// Hosts may apply a manipulator more than once (for example when a lower layer is removed and
/// the method is rebuilt), so `manipulate` must produce the same result for the same input.
pub trait Manipulator: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Rewrites `body` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be rewritten. The host then discards the layer.
    fn manipulate(&self, body: &mut MethodBody) -> Result<()>;
}

/// Owner of method bodies that can be patched.
pub trait DetourHost {
    /// Returns the metadata of `method`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MethodNotFound`] for unknown tokens.
    fn describe(&self, method: Token) -> Result<MethodDescriptor>;

    /// Makes `hook` callable and returns the token `call` instructions use for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot register more callables.
    fn import_hook(&mut self, hook: &Hook) -> Result<Token>;

    /// Unregisters a callable returned by [`DetourHost::import_hook`]. The token may be handed
    /// out again by a later import.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MethodNotFound`] if `hook` is not an imported callable.
    fn release_hook(&mut self, hook: Token) -> Result<()>;

    /// Applies `manipulator` on top of the layers already installed on `method`.
    ///
    /// All or nothing: if the manipulator fails or its result is invalid, the method keeps its
    /// previous body and no layer is added.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MethodNotFound`] for unknown tokens, or the manipulator's error.
    fn install(&mut self, method: Token, manipulator: Arc<dyn Manipulator>) -> Result<DetourId>;

    /// Removes exactly the layer `detour` from `method`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DetourNotFound`] if the layer is not installed.
    fn uninstall(&mut self, method: Token, detour: DetourId) -> Result<()>;
}
