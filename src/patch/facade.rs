//! The patch registration point.
//!
//! [`Patcher`] owns a [`DetourHost`] and keeps track of the layers it installed. Every
//! [`Patcher::patch`] call is validated completely before the host is touched, so a hook that
//! does not fit its target never leaves a half-patched method behind.

use std::{collections::HashMap, fmt, sync::Arc};

use log::{debug, warn};

use crate::{
    metadata::token::Token,
    patch::{
        binder::{bind, ParameterTable},
        chain::BoundHook,
        hook::HookSet,
        host::{DetourHost, DetourId},
        session::RewriteSession,
    },
    Result,
};

/// Handle of one installed patch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchHandle {
    /// Patched method
    pub method: Token,
    /// Host record of the layer
    pub detour: DetourId,
}

impl fmt::Display for PatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.method, self.detour)
    }
}

/// Installs and removes hook layers on the methods of a host.
///
/// # Examples
///
/// ```rust
/// use dotpatch::prelude::*;
///
/// let mut runtime = Runtime::new();
/// let answer = runtime.define_method(
///     MethodDescriptor::new("Answer", "Oracle").returns(TypeSig::I32),
///     MethodBodyBuilder::new()
///         .implementation(|asm| {
///             asm.ldc_i4(42)?.ret()?;
///             Ok(())
///         })
///         .build()?,
/// )?;
///
/// let mut patcher = Patcher::new(runtime);
/// let handle = patcher.patch(
///     answer,
///     HookSet::new().postfix(
///         Hook::new("Lie", |call| {
///             call.set(0, EmValue::I32(7))?;
///             Ok(CallOutcome::Return(None))
///         })
///         .by_ref("__result"),
///     ),
/// )?;
///
/// let outcome = patcher.host_mut().invoke(answer, &[])?;
/// assert_eq!(outcome, CallOutcome::Return(Some(EmValue::I32(7))));
///
/// patcher.unpatch(handle)?;
/// let outcome = patcher.host_mut().invoke(answer, &[])?;
/// assert_eq!(outcome, CallOutcome::Return(Some(EmValue::I32(42))));
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct Patcher<H: DetourHost> {
    host: H,
    installed: Vec<PatchHandle>,
    imports: HashMap<PatchHandle, Vec<Token>>,
}

impl<H: DetourHost> Patcher<H> {
    /// Creates a patcher over `host`.
    pub fn new(host: H) -> Self {
        Patcher {
            host,
            installed: Vec::new(),
            imports: HashMap::new(),
        }
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably (for example to invoke patched methods).
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Releases the host. Installed layers stay in place.
    pub fn into_host(self) -> H {
        self.host
    }

    /// Active layers in installation order.
    pub fn installed(&self) -> &[PatchHandle] {
        &self.installed
    }

    /// Installs `hooks` on `method` as a new layer.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::MethodNotFound`] if the host does not know `method`
    /// - [`crate::Error::Binding`] if a hook does not fit the method; nothing is installed
    /// - any error of the host's import or install, in which case the method is left unchanged
    ///   and the hooks imported for it are released again
    pub fn patch(&mut self, method: Token, hooks: HookSet) -> Result<PatchHandle> {
        let descriptor = self.host.describe(method)?;
        let table = ParameterTable::build(&descriptor)?;

        let mut bound = Vec::with_capacity(hooks.len());
        for (role, hook) in hooks.iter() {
            let arguments = bind(&table, hook, role)?;
            bound.push((role, hook, arguments));
        }
        debug!(
            "bound {} hooks against {}",
            bound.len(),
            descriptor.full_name()
        );

        let mut imported = Vec::with_capacity(bound.len());
        let mut plans = Vec::with_capacity(bound.len());
        for (role, hook, arguments) in bound {
            let callee = match self.host.import_hook(hook) {
                Ok(callee) => callee,
                Err(err) => {
                    self.discard(&imported);
                    return Err(err);
                }
            };
            imported.push(callee);
            plans.push(BoundHook {
                role,
                name: hook.name().to_string(),
                arguments,
                returns: hook.return_kind(),
                callee,
            });
        }

        let session = RewriteSession::new(descriptor, plans);
        let detour = match self.host.install(method, Arc::new(session)) {
            Ok(detour) => detour,
            Err(err) => {
                self.discard(&imported);
                return Err(err);
            }
        };

        let handle = PatchHandle { method, detour };
        self.installed.push(handle);
        self.imports.insert(handle, imported);

        debug!("patched {}", handle);
        Ok(handle)
    }

    /// Removes exactly the layer behind `handle` and releases its hooks.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DetourNotFound`] if the layer is not installed, or the host's
    /// error when a hook cannot be released.
    pub fn unpatch(&mut self, handle: PatchHandle) -> Result<()> {
        self.host.uninstall(handle.method, handle.detour)?;
        self.forget(handle)?;
        debug!("unpatched {}", handle);
        Ok(())
    }

    /// Removes every layer, most recent first.
    ///
    /// # Errors
    ///
    /// Stops at the first layer that cannot be removed; layers removed so far stay removed.
    pub fn dispose_all(&mut self) -> Result<()> {
        while let Some(handle) = self.installed.last().copied() {
            self.host.uninstall(handle.method, handle.detour)?;
            self.forget(handle)?;
            debug!("disposed {}", handle);
        }
        Ok(())
    }

    fn forget(&mut self, handle: PatchHandle) -> Result<()> {
        self.installed.retain(|installed| *installed != handle);
        for hook in self.imports.remove(&handle).unwrap_or_default() {
            self.host.release_hook(hook)?;
        }
        Ok(())
    }

    /// Releases hooks of a patch that was never installed.
    fn discard(&mut self, imported: &[Token]) {
        for &hook in imported {
            if let Err(err) = self.host.release_hook(hook) {
                warn!("cannot release hook {}: {}", hook, err);
            }
        }
    }
}
