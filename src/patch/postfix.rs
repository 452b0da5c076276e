//! Postfix injection.
//!
//! Postfixes run after the original body, right before the return. For value-returning
//! methods the session has already captured the return value into `retVal`, so postfixes can
//! read it (`ldloc`) or overwrite it (`ldloca`) through `__result`. Postfixes cannot prevent
//! the return; anything they return is discarded.

use crate::{
    assembly::{IlCursor, OpCode},
    patch::chain::{emit_hook_call, BoundHook, SessionLocals},
    Result,
};

/// Emits all postfixes at the cursor.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if emission fails.
pub fn inject_postfixes(
    cursor: &mut IlCursor<'_>,
    postfixes: &[BoundHook],
    locals: &SessionLocals,
) -> Result<()> {
    for postfix in postfixes {
        emit_hook_call(cursor, postfix, locals)?;
        if postfix.returns.produces_value() {
            cursor.emit_op(OpCode::Pop)?;
        }
    }
    Ok(())
}
