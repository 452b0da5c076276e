//! Name-based parameter binding.
//!
//! Hooks receive the original method's arguments by *name*: a hook parameter called `a` gets
//! the target's parameter `a`. Three reserved names give access to state that is not an
//! argument of the original method:
//!
//! | Name | Meaning | Allowed in |
//! |------|---------|------------|
//! | `__instance` | the receiver (`this`) | instance methods, every role |
//! | `__result` | the return value | non-void methods, postfix and finalizer |
//! | `__exception` | the caught exception | finalizer |
//!
//! Binding happens once, when a patch is requested, and is pure: it produces a list of
//! [`ResolvedArgument`]s or a [`BindingError`] without touching any method body.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    metadata::method::MethodDescriptor,
    patch::hook::{Hook, HookRole, ReturnKind},
    Result,
};

/// Reserved name binding the receiver of an instance method.
pub const INSTANCE_PARAM: &str = "__instance";
/// Reserved name binding the return value.
pub const RESULT_PARAM: &str = "__result";
/// Reserved name binding the caught exception.
pub const EXCEPTION_PARAM: &str = "__exception";

/// A hook cannot be bound against its target method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// A hook parameter matches neither a target parameter nor a reserved name.
    #[error("Hook '{hook}' parameter '{parameter}' matches no parameter of {method}")]
    UnknownParameter {
        /// Hook name
        hook: String,
        /// Offending formal parameter
        parameter: String,
        /// Target method
        method: String,
    },

    /// `__instance` was requested on a static method.
    #[error("Hook '{hook}' binds __instance but {method} is static")]
    StaticInstance {
        /// Hook name
        hook: String,
        /// Target method
        method: String,
    },

    /// `__result` was requested by a prefix.
    #[error("Prefix '{hook}' binds __result, which does not exist before {method} runs")]
    ResultInPrefix {
        /// Hook name
        hook: String,
        /// Target method
        method: String,
    },

    /// `__result` was requested on a method without return value.
    #[error("Hook '{hook}' binds __result but {method} returns void")]
    VoidResult {
        /// Hook name
        hook: String,
        /// Target method
        method: String,
    },

    /// `__exception` was requested outside a finalizer.
    #[error("{role} '{hook}' binds __exception, which only finalizers of {method} can see")]
    ExceptionOutsideFinalizer {
        /// Hook name
        hook: String,
        /// Role the hook was registered for
        role: String,
        /// Target method
        method: String,
    },

    /// A finalizer declared a boolean return.
    #[error("Finalizer '{hook}' of {method} returns bool; finalizers return nothing or an exception")]
    BoolFinalizer {
        /// Hook name
        hook: String,
        /// Target method
        method: String,
    },

    /// The target method declares the same parameter name twice.
    #[error("{method} declares parameter '{parameter}' more than once")]
    DuplicateParameter {
        /// Duplicated name
        parameter: String,
        /// Target method
        method: String,
    },
}

/// What a single hook argument is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedArgument {
    /// An argument slot of the original method
    Original {
        /// Argument slot
        slot: u16,
        /// Pass the address instead of the value
        by_ref: bool,
    },
    /// The receiver (argument slot 0 of an instance method)
    Instance {
        /// Pass the address instead of the value
        by_ref: bool,
    },
    /// The captured return value
    Result {
        /// Pass the address instead of the value
        by_ref: bool,
    },
    /// The caught exception
    Exception {
        /// Pass the address instead of the value
        by_ref: bool,
    },
}

/// Mapping from the target's parameter names to argument slots.
#[derive(Debug, Clone)]
pub struct ParameterTable {
    slots: HashMap<String, u16>,
    method: String,
    is_static: bool,
    returns_value: bool,
}

impl ParameterTable {
    /// Builds the table for `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::DuplicateParameter`] if two parameters share a name.
    pub fn build(descriptor: &MethodDescriptor) -> Result<Self> {
        let method = descriptor.full_name();
        let mut slots = HashMap::with_capacity(descriptor.parameters.len());

        for (index, parameter) in descriptor.parameters.iter().enumerate() {
            let slot = descriptor
                .parameter_slot(index)
                .ok_or_else(|| malformed_error!("{} has too many parameters", method))?;
            if slots.insert(parameter.name.clone(), slot).is_some() {
                return Err(BindingError::DuplicateParameter {
                    parameter: parameter.name.clone(),
                    method,
                }
                .into());
            }
        }

        Ok(ParameterTable {
            slots,
            method,
            is_static: descriptor.is_static,
            returns_value: descriptor.returns_value(),
        })
    }

    /// Slot of the parameter called `name`.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<u16> {
        self.slots.get(name).copied()
    }

    /// Number of named parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the target has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Full name of the target method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Resolves every formal parameter of `hook` for use in `role`.
///
/// Target parameter names take precedence over the reserved names, so a method that really has
/// a parameter called `__result` binds that parameter.
///
/// # Errors
///
/// Returns an [`crate::Error::Binding`] describing the first parameter (or return kind) that
/// cannot be bound.
pub fn bind(table: &ParameterTable, hook: &Hook, role: HookRole) -> Result<Vec<ResolvedArgument>> {
    let method = || table.method.clone();
    let hook_name = || hook.name().to_string();

    if role == HookRole::Finalizer && hook.return_kind() == ReturnKind::Bool {
        return Err(BindingError::BoolFinalizer {
            hook: hook_name(),
            method: method(),
        }
        .into());
    }

    let mut arguments = Vec::with_capacity(hook.parameters().len());
    for parameter in hook.parameters() {
        let by_ref = parameter.by_ref;

        if let Some(slot) = table.slot(&parameter.name) {
            arguments.push(ResolvedArgument::Original { slot, by_ref });
            continue;
        }

        let argument = match parameter.name.as_str() {
            INSTANCE_PARAM => {
                if table.is_static {
                    return Err(BindingError::StaticInstance {
                        hook: hook_name(),
                        method: method(),
                    }
                    .into());
                }
                ResolvedArgument::Instance { by_ref }
            }
            RESULT_PARAM => {
                if role == HookRole::Prefix {
                    return Err(BindingError::ResultInPrefix {
                        hook: hook_name(),
                        method: method(),
                    }
                    .into());
                }
                if !table.returns_value {
                    return Err(BindingError::VoidResult {
                        hook: hook_name(),
                        method: method(),
                    }
                    .into());
                }
                ResolvedArgument::Result { by_ref }
            }
            EXCEPTION_PARAM => {
                if role != HookRole::Finalizer {
                    return Err(BindingError::ExceptionOutsideFinalizer {
                        hook: hook_name(),
                        role: role.to_string(),
                        method: method(),
                    }
                    .into());
                }
                ResolvedArgument::Exception { by_ref }
            }
            _ => {
                return Err(BindingError::UnknownParameter {
                    hook: hook_name(),
                    parameter: parameter.name.clone(),
                    method: method(),
                }
                .into())
            }
        };
        arguments.push(argument);
    }

    Ok(arguments)
}
