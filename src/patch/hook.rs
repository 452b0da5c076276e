//! Hook descriptors.
//!
//! A [`Hook`] is an externally supplied procedure plus the metadata the binder needs: its formal
//! parameter names (with by-reference flags) and what it returns. The role of a hook is not part
//! of the hook itself; it is implied by the list of a [`HookSet`] it is registered into.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::{
//!     emulation::{CallOutcome, EmValue},
//!     patch::{Hook, HookSet, ReturnKind},
//! };
//!
//! // bool Prefix(int a) => a != 0;
//! let guard = Hook::new("NonZeroGuard", |call| {
//!     let a = call.arg(0)?.as_i32()?;
//!     Ok(CallOutcome::Return(Some(EmValue::Bool(a != 0))))
//! })
//! .param("a")
//! .returns(ReturnKind::Bool);
//!
//! // void Postfix(ref int __result) => __result = 0;
//! let zero = Hook::new("ZeroResult", |call| {
//!     call.set(0, EmValue::I32(0))?;
//!     Ok(CallOutcome::Return(None))
//! })
//! .by_ref("__result");
//!
//! let hooks = HookSet::new().prefix(guard).postfix(zero);
//! assert_eq!(hooks.len(), 2);
//! ```

use std::{fmt, sync::Arc};

use strum::{Display, EnumIter};

use crate::{
    emulation::{CallOutcome, NativeCall},
    Result,
};

/// Native procedure backing a hook.
pub type NativeFn = Arc<dyn Fn(&mut NativeCall<'_>) -> Result<CallOutcome> + Send + Sync>;

/// What a hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    /// Nothing
    #[default]
    Void,
    /// A boolean; for prefixes `false` skips the original method
    Bool,
    /// Any other value; for finalizers the replacement exception (`null` clears)
    Value,
}

impl ReturnKind {
    /// Returns `true` if a call to the hook leaves a value on the stack.
    #[must_use]
    pub fn produces_value(self) -> bool {
        !matches!(self, ReturnKind::Void)
    }
}

/// Which interception phase a hook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum HookRole {
    /// Runs before the original body
    Prefix,
    /// Runs after the original body, before the return
    Postfix,
    /// Runs on every exit, normal or exceptional
    Finalizer,
}

/// A formal parameter of a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookParameter {
    /// Name used for binding
    pub name: String,
    /// Whether the hook receives the address instead of the value
    pub by_ref: bool,
}

/// An externally supplied hook procedure.
#[derive(Clone)]
pub struct Hook {
    name: String,
    parameters: Vec<HookParameter>,
    returns: ReturnKind,
    handler: NativeFn,
}

impl Hook {
    /// Creates a parameterless, void-returning hook.
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&mut NativeCall<'_>) -> Result<CallOutcome> + Send + Sync + 'static,
    {
        Hook {
            name: name.to_string(),
            parameters: Vec::new(),
            returns: ReturnKind::Void,
            handler: Arc::new(handler),
        }
    }

    /// Appends a by-value formal parameter.
    #[must_use]
    pub fn param(mut self, name: &str) -> Self {
        self.parameters.push(HookParameter {
            name: name.to_string(),
            by_ref: false,
        });
        self
    }

    /// Appends a by-reference formal parameter.
    #[must_use]
    pub fn by_ref(mut self, name: &str) -> Self {
        self.parameters.push(HookParameter {
            name: name.to_string(),
            by_ref: true,
        });
        self
    }

    /// Sets the return kind.
    #[must_use]
    pub fn returns(mut self, kind: ReturnKind) -> Self {
        self.returns = kind;
        self
    }

    /// Hook name, used in diagnostics and binding errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Formal parameters in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[HookParameter] {
        &self.parameters
    }

    /// Return kind.
    #[must_use]
    pub fn return_kind(&self) -> ReturnKind {
        self.returns
    }

    /// The native procedure.
    #[must_use]
    pub fn handler(&self) -> &NativeFn {
        &self.handler
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// The hooks of one patch, by role. Omitted roles are empty.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    /// Hooks run before the original body, in order
    pub prefixes: Vec<Hook>,
    /// Hooks run before the return, in order
    pub postfixes: Vec<Hook>,
    /// Hooks run on every exit, in order
    pub finalizers: Vec<Hook>,
}

impl HookSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prefix.
    #[must_use]
    pub fn prefix(mut self, hook: Hook) -> Self {
        self.prefixes.push(hook);
        self
    }

    /// Adds a postfix.
    #[must_use]
    pub fn postfix(mut self, hook: Hook) -> Self {
        self.postfixes.push(hook);
        self
    }

    /// Adds a finalizer.
    #[must_use]
    pub fn finalizer(mut self, hook: Hook) -> Self {
        self.finalizers.push(hook);
        self
    }

    /// Total number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len() + self.postfixes.len() + self.finalizers.len()
    }

    /// Returns `true` if no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates all hooks with their role: prefixes, then postfixes, then finalizers.
    pub fn iter(&self) -> impl Iterator<Item = (HookRole, &Hook)> {
        let prefixes = self.prefixes.iter().map(|hook| (HookRole::Prefix, hook));
        let postfixes = self.postfixes.iter().map(|hook| (HookRole::Postfix, hook));
        let finalizers = self.finalizers.iter().map(|hook| (HookRole::Finalizer, hook));
        prefixes.chain(postfixes).chain(finalizers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Hook {
        Hook::new(name, |_| Ok(CallOutcome::Return(None)))
    }

    #[test]
    fn test_hook_builder() {
        let hook = noop("Log")
            .param("a")
            .by_ref("__result")
            .returns(ReturnKind::Bool);

        assert_eq!(hook.name(), "Log");
        assert_eq!(hook.parameters().len(), 2);
        assert!(!hook.parameters()[0].by_ref);
        assert!(hook.parameters()[1].by_ref);
        assert_eq!(hook.return_kind(), ReturnKind::Bool);
        assert!(format!("{hook:?}").contains("Log"));
    }

    #[test]
    fn test_hook_set_order() {
        let set = HookSet::new()
            .finalizer(noop("F"))
            .prefix(noop("P1"))
            .postfix(noop("S"))
            .prefix(noop("P2"));

        let order: Vec<(HookRole, &str)> = set.iter().map(|(role, hook)| (role, hook.name())).collect();
        assert_eq!(
            order,
            vec![
                (HookRole::Prefix, "P1"),
                (HookRole::Prefix, "P2"),
                (HookRole::Postfix, "S"),
                (HookRole::Finalizer, "F"),
            ]
        );
        assert!(!set.is_empty());
        assert!(HookSet::new().is_empty());
    }

    #[test]
    fn test_return_kind() {
        assert!(!ReturnKind::Void.produces_value());
        assert!(ReturnKind::Bool.produces_value());
        assert!(ReturnKind::Value.produces_value());
        assert_eq!(HookRole::Finalizer.to_string(), "Finalizer");
    }
}
