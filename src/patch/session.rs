//! Orchestration of one patch layer.
//!
//! A [`RewriteSession`] holds the bound hooks of one `patch` call and rewrites a method body in
//! a fixed order:
//!
//! 1. **Normalize returns** - every `ret` but the exit becomes a branch to it. The exit is the
//!    last instruction of the body, appended if code follows the last `ret`.
//! 2. **Prefixes** - spliced at the start of the body.
//! 3. **Open the return point** - in front of the exit, the return value (if needed) is stored
//!    into `retVal`.
//! 4. **Postfixes** - spliced after the capture.
//! 5. **Landing** - `ldloc retVal` to feed the `ret`, or `leave` into the finalizer chain.
//! 6. **Seal** - every branch and region boundary that targeted the exit is moved to the first
//!    epilogue instruction, so all paths of the original body run the postfixes.
//! 7. **Skip target** - the label used by boolean prefixes is marked at the landing. It is
//!    marked after sealing, so a skipped call bypasses the postfixes but not the finalizers.
//! 8. **Finalizers** - the whole body is wrapped in a catch-all region.

use log::debug;

use crate::{
    assembly::{IlCursor, MethodBody, OpCode},
    metadata::method::MethodDescriptor,
    patch::{
        chain::{BoundHook, SessionLocals},
        finalizer::inject_finalizers,
        hook::{HookRole, ReturnKind},
        host::Manipulator,
        postfix::inject_postfixes,
        prefix::inject_prefixes,
    },
    Result,
};

/// The manipulator installed for one `patch` call.
#[derive(Debug, Clone)]
pub struct RewriteSession {
    name: String,
    method: MethodDescriptor,
    prefixes: Vec<BoundHook>,
    postfixes: Vec<BoundHook>,
    finalizers: Vec<BoundHook>,
}

impl RewriteSession {
    /// Creates a session for `method`. Hooks keep their relative order within each role.
    #[must_use]
    pub fn new(method: MethodDescriptor, hooks: Vec<BoundHook>) -> Self {
        let mut prefixes = Vec::new();
        let mut postfixes = Vec::new();
        let mut finalizers = Vec::new();
        for hook in hooks {
            match hook.role {
                HookRole::Prefix => prefixes.push(hook),
                HookRole::Postfix => postfixes.push(hook),
                HookRole::Finalizer => finalizers.push(hook),
            }
        }

        let name = format!(
            "{} [{} prefix, {} postfix, {} finalizer]",
            method.full_name(),
            prefixes.len(),
            postfixes.len(),
            finalizers.len()
        );

        RewriteSession {
            name,
            method,
            prefixes,
            postfixes,
            finalizers,
        }
    }

    /// The target method.
    #[must_use]
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// Number of hooks across all roles.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.prefixes.len() + self.postfixes.len() + self.finalizers.len()
    }

    fn can_skip(&self) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| prefix.returns == ReturnKind::Bool)
    }

    fn captures_result(&self) -> bool {
        self.method.returns_value()
            && (!self.postfixes.is_empty() || !self.finalizers.is_empty() || self.can_skip())
    }

    /// Rewrites `body`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the body has no `ret` or code cannot be emitted.
    pub fn apply(&self, body: &mut MethodBody) -> Result<()> {
        debug!("applying {}", self.name);

        let exit = body.normalize_returns()?;
        let mut locals = SessionLocals::default();
        if self.captures_result() {
            locals.ret_val = Some(body.add_local("retVal", self.method.return_type.clone())?);
        }

        let mut cursor = IlCursor::new(body);
        let skip = self.can_skip().then(|| cursor.define_label());

        cursor.goto(0)?;
        inject_prefixes(&mut cursor, &self.prefixes, &mut locals, skip)?;

        cursor.goto_id(exit)?;
        let epilogue_start = cursor.index();
        if let Some(ret_val) = locals.ret_val {
            cursor.emit_stloc(ret_val)?;
        }
        inject_postfixes(&mut cursor, &self.postfixes, &locals)?;

        let normal = (!self.finalizers.is_empty()).then(|| cursor.define_label());
        let landing = match (normal, locals.ret_val) {
            (Some(normal), _) => Some(cursor.emit_branch(OpCode::Leave, normal)?),
            (None, Some(ret_val)) => Some(cursor.emit_ldloc(ret_val)?),
            (None, None) => None,
        };

        if let Some(first) = cursor
            .body()
            .instructions
            .get(epilogue_start)
            .map(|instr| instr.id)
            .filter(|first| *first != exit)
        {
            let moved = cursor.body_mut().retarget(exit, first);
            debug!("epilogue sealed, {} references moved off the exit", moved);
        }

        if let Some(skip) = skip {
            cursor.body_mut().mark_label(skip, landing.unwrap_or(exit))?;
        }

        if let Some(normal) = normal {
            inject_finalizers(&mut cursor, &self.finalizers, &mut locals, exit, normal)?;
        }

        cursor.settle()
    }
}

impl Manipulator for RewriteSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn manipulate(&self, body: &mut MethodBody) -> Result<()> {
        self.apply(body)
    }
}
