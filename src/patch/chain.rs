//! Emission of a single hook call.
//!
//! Every injector ends up doing the same thing per hook: push the bound arguments, then call
//! the hook. What happens with the hook's return value differs per role and is left to the
//! injectors.

use log::trace;

use crate::{
    assembly::IlCursor,
    metadata::token::Token,
    patch::{
        binder::ResolvedArgument,
        hook::{HookRole, ReturnKind},
    },
    Result,
};

/// A hook that has been bound against its target and imported into the host.
#[derive(Debug, Clone)]
pub struct BoundHook {
    /// Phase the hook runs in
    pub role: HookRole,
    /// Hook name, for diagnostics
    pub name: String,
    /// Arguments in the hook's declaration order
    pub arguments: Vec<ResolvedArgument>,
    /// What the hook leaves on the stack
    pub returns: ReturnKind,
    /// Callable token assigned by the host
    pub callee: Token,
}

/// Locals synthesized by a rewriting session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionLocals {
    /// Holds the return value once captured
    pub ret_val: Option<u16>,
    /// Holds the exception seen by finalizers
    pub saved_exception: Option<u16>,
    /// Holds the decision of the last boolean prefix
    pub run_original: Option<u16>,
}

/// Emits the argument loads and the call for `hook` at the cursor.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the hook binds a pseudo-parameter whose backing
/// local was not allocated.
pub fn emit_hook_call(
    cursor: &mut IlCursor<'_>,
    hook: &BoundHook,
    locals: &SessionLocals,
) -> Result<()> {
    trace!(
        "emitting {} '{}' ({} arguments) at IL_{:04}",
        hook.role,
        hook.name,
        hook.arguments.len(),
        cursor.index()
    );

    for argument in &hook.arguments {
        match *argument {
            ResolvedArgument::Original { slot, by_ref } => {
                if by_ref {
                    cursor.emit_ldarga(slot)?;
                } else {
                    cursor.emit_ldarg(slot)?;
                }
            }
            ResolvedArgument::Instance { by_ref } => {
                if by_ref {
                    cursor.emit_ldarga(0)?;
                } else {
                    cursor.emit_ldarg(0)?;
                }
            }
            ResolvedArgument::Result { by_ref } => {
                let local = locals.ret_val.ok_or_else(|| {
                    malformed_error!("'{}' binds __result but no result is captured", hook.name)
                })?;
                load_local(cursor, local, by_ref)?;
            }
            ResolvedArgument::Exception { by_ref } => {
                let local = locals.saved_exception.ok_or_else(|| {
                    malformed_error!("'{}' binds __exception outside a handler", hook.name)
                })?;
                load_local(cursor, local, by_ref)?;
            }
        }
    }

    cursor.emit_call(hook.callee)?;
    Ok(())
}

fn load_local(cursor: &mut IlCursor<'_>, local: u16, by_ref: bool) -> Result<()> {
    if by_ref {
        cursor.emit_ldloca(local)?;
    } else {
        cursor.emit_ldloc(local)?;
    }
    Ok(())
}
