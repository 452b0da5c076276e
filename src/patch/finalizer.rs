//! Finalizer injection.
//!
//! Finalizers see every exit of the method. The already patched body (prefixes, original code
//! including any blocks placed after its last return, postfixes) is wrapped in a catch-all region and the finalizer chain is emitted twice: once
//! in the handler for the exceptional exit and once after the region for the normal exit.
//!
//! ```text
//!         nop                                  ; try start
//!         <prefixes> <original> <postfixes>
//!         leave NORMAL
//! HANDLER stloc savedException                 ; catch System.Exception
//!         <chain>
//!         ldloc savedException; brfalse RESUME
//!         ldloc savedException; throw
//! RESUME  leave EXIT
//! NORMAL  ldnull; stloc savedException         ; outside the protected region
//!         <chain>
//!         ldloc savedException; brfalse EXIT
//!         ldloc savedException; throw
//! EXIT    ldloc retVal                         ; value-returning methods only
//!         ret
//! ```
//!
//! Within `<chain>`, a finalizer returning a value stores it as the new `savedException` and
//! throws it right away when it is not null, which ends the chain.
//!
//! A pending exception leaves the method through a plain `throw` of `savedException`, not
//! `rethrow`: the caught exception object is thrown again from the handler rather than
//! rethrown with its original throw site.

use log::trace;

use crate::{
    assembly::{ExceptionHandler, IlCursor, InstrId, Label, OpCode},
    metadata::method::TypeSig,
    patch::{
        chain::{emit_hook_call, BoundHook, SessionLocals},
        hook::ReturnKind,
    },
    Result,
};

/// Exception type caught by the finalizer region.
pub const CATCH_ALL: &str = "System.Exception";

/// Wraps the body in the finalizer region and emits both chains.
///
/// `exit` is the method's single `ret`; `normal` is the label the epilogue leaves the
/// protected region through. It is marked here.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if emission fails.
pub fn inject_finalizers(
    cursor: &mut IlCursor<'_>,
    finalizers: &[BoundHook],
    locals: &mut SessionLocals,
    exit: InstrId,
    normal: Label,
) -> Result<()> {
    let saved = cursor.add_local("savedException", TypeSig::Exception)?;
    locals.saved_exception = Some(saved);

    cursor.goto(0)?;
    let try_start = cursor.emit_op(OpCode::Nop)?;

    cursor.goto_id(exit)?;
    let handler_start = cursor.emit_stloc(saved)?;
    emit_chain(cursor, finalizers, locals, saved)?;
    let resume = cursor.define_label();
    throw_if_set(cursor, saved, resume)?;
    cursor.mark_label(resume);
    let exit_label = cursor.define_label();
    cursor.emit_branch(OpCode::Leave, exit_label)?;

    cursor.mark_label(normal);
    let normal_start = cursor.emit_op(OpCode::Ldnull)?;
    cursor.emit_stloc(saved)?;
    emit_chain(cursor, finalizers, locals, saved)?;
    throw_if_set(cursor, saved, exit_label)?;

    cursor.mark_label(exit_label);
    if let Some(ret_val) = locals.ret_val {
        cursor.emit_ldloc(ret_val)?;
    }
    cursor.settle()?;

    cursor.body_mut().exception_handlers.push(ExceptionHandler::catch(
        try_start,
        handler_start,
        handler_start,
        normal_start,
        Some(CATCH_ALL),
    ));

    trace!(
        "finalizer region {}..{} with {} finalizers",
        try_start,
        normal_start,
        finalizers.len()
    );
    Ok(())
}

fn emit_chain(
    cursor: &mut IlCursor<'_>,
    finalizers: &[BoundHook],
    locals: &SessionLocals,
    saved: u16,
) -> Result<()> {
    for finalizer in finalizers {
        emit_hook_call(cursor, finalizer, locals)?;
        if finalizer.returns == ReturnKind::Value {
            cursor.emit_stloc(saved)?;
            let next = cursor.define_label();
            throw_if_set(cursor, saved, next)?;
            cursor.mark_label(next);
        }
    }
    Ok(())
}

/// `ldloc saved; brfalse otherwise; ldloc saved; throw`
fn throw_if_set(cursor: &mut IlCursor<'_>, saved: u16, otherwise: Label) -> Result<()> {
    cursor.emit_ldloc(saved)?;
    cursor.emit_branch(OpCode::Brfalse, otherwise)?;
    cursor.emit_ldloc(saved)?;
    cursor.emit_op(OpCode::Throw)?;
    Ok(())
}
