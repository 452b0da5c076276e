//! Prefix injection.
//!
//! Prefixes are spliced in front of the original body in registration order. A prefix that
//! returns `bool` decides whether the rest runs:
//!
//! ```text
//! <args> call Prefix
//! stloc runOriginal
//! ldloc runOriginal
//! brfalse SKIP          ; remaining prefixes, original body and postfixes are bypassed
//! ```
//!
//! `SKIP` is owned by the session, which marks it once the epilogue exists.

use log::trace;

use crate::{
    assembly::{IlCursor, Label, OpCode},
    metadata::method::TypeSig,
    patch::{
        chain::{emit_hook_call, BoundHook, SessionLocals},
        hook::ReturnKind,
    },
    Result,
};

/// Emits all prefixes at the cursor.
///
/// `skip` must be provided when any prefix returns `bool`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a boolean prefix is present without a skip label or
/// emission fails.
pub fn inject_prefixes(
    cursor: &mut IlCursor<'_>,
    prefixes: &[BoundHook],
    locals: &mut SessionLocals,
    skip: Option<Label>,
) -> Result<()> {
    for prefix in prefixes {
        emit_hook_call(cursor, prefix, locals)?;

        match prefix.returns {
            ReturnKind::Void => {}
            ReturnKind::Value => {
                cursor.emit_op(OpCode::Pop)?;
            }
            ReturnKind::Bool => {
                let skip = skip.ok_or_else(|| {
                    malformed_error!("boolean prefix '{}' without a skip target", prefix.name)
                })?;
                let flag = match locals.run_original {
                    Some(flag) => flag,
                    None => {
                        let flag = cursor.add_local("runOriginal", TypeSig::Bool)?;
                        locals.run_original = Some(flag);
                        flag
                    }
                };

                cursor.emit_stloc(flag)?;
                cursor.emit_ldloc(flag)?;
                cursor.emit_branch(OpCode::Brfalse, skip)?;
                trace!("prefix '{}' may skip the original body", prefix.name);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{MethodBody, Operand},
        metadata::token::Token,
        patch::{binder::ResolvedArgument, hook::HookRole},
    };

    fn prefix(returns: ReturnKind, callee: u32) -> BoundHook {
        BoundHook {
            role: HookRole::Prefix,
            name: format!("P{callee}"),
            arguments: vec![ResolvedArgument::Original {
                slot: 0,
                by_ref: false,
            }],
            returns,
            callee: Token::new(0x0A00_0000 | callee),
        }
    }

    #[test]
    fn test_prefix_shapes() {
        let mut body = MethodBody::new();
        body.push(OpCode::Ret, Operand::None).unwrap();
        let skip = body.define_label();
        let mut locals = SessionLocals::default();

        let prefixes = [
            prefix(ReturnKind::Void, 1),
            prefix(ReturnKind::Bool, 2),
            prefix(ReturnKind::Value, 3),
            prefix(ReturnKind::Bool, 4),
        ];

        let mut cursor = IlCursor::new(&mut body);
        inject_prefixes(&mut cursor, &prefixes, &mut locals, Some(skip)).unwrap();

        let emitted: Vec<String> = body.instructions.iter().map(ToString::to_string).collect();
        assert_eq!(
            emitted,
            vec![
                "ldarg A_0",
                "call 0x0a000001",
                "ldarg A_0",
                "call 0x0a000002",
                "stloc V_0",
                "ldloc V_0",
                "brfalse L0",
                "ldarg A_0",
                "call 0x0a000003",
                "pop",
                "ldarg A_0",
                "call 0x0a000004",
                "stloc V_0",
                "ldloc V_0",
                "brfalse L0",
                "ret",
            ]
        );
        assert_eq!(locals.run_original, Some(0));
        assert_eq!(body.locals.len(), 1);
    }

    #[test]
    fn test_bool_prefix_requires_skip() {
        let mut body = MethodBody::new();
        body.push(OpCode::Ret, Operand::None).unwrap();
        let mut locals = SessionLocals::default();

        let mut cursor = IlCursor::new(&mut body);
        let result = inject_prefixes(
            &mut cursor,
            &[prefix(ReturnKind::Bool, 1)],
            &mut locals,
            None,
        );
        assert!(result.is_err());
    }
}
