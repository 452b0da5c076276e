//! The reference runtime: a method table, a heap and a console behind a [`DetourHost`].
//!
//! # Layering
//!
//! Every IL method keeps its pristine body and the ordered list of installed manipulators. The
//! body that executes is always rebuilt from the pristine body by applying the manipulators in
//! installation order, so removing any layer (not just the most recent one) leaves exactly the
//! remaining layers in effect.
//!
//! Installing is all or nothing: if the new manipulator fails, or the rebuilt body does not
//! load, the method keeps executing its previous body and the layer is not recorded.

use std::{collections::HashMap, fmt::Write as _, sync::Arc};

use log::{debug, warn};

use crate::{
    assembly::MethodBody,
    emulation::{
        interpreter::{Callee, Interpreter, MethodResolver},
        loader::{load, LoadedMethod},
        native::{NativeCall, NativeMethod},
        CallOutcome, EmValue, EmulationConfig, ManagedHeap,
    },
    metadata::{
        method::MethodDescriptor,
        token::{Token, MAX_ROW, TABLE_MEMBER_REF, TABLE_METHOD_DEF},
    },
    patch::{DetourHost, DetourId, Hook, Manipulator},
    Error, Result,
};

struct Layer {
    id: DetourId,
    manipulator: Arc<dyn Manipulator>,
}

struct MethodRecord {
    descriptor: MethodDescriptor,
    pristine: MethodBody,
    layers: Vec<Layer>,
    effective: Arc<LoadedMethod>,
}

#[derive(Default)]
struct MethodTable {
    methods: HashMap<Token, MethodRecord>,
    natives: HashMap<Token, NativeMethod>,
}

impl MethodResolver for MethodTable {
    fn resolve(&self, token: Token) -> Option<Callee> {
        if let Some(record) = self.methods.get(&token) {
            return Some(Callee::Il(Arc::clone(&record.effective)));
        }
        self.natives.get(&token).cloned().map(Callee::Native)
    }
}

/// Applies `layers` to a copy of `pristine` and loads the result.
fn rebuild(
    token: Token,
    descriptor: &MethodDescriptor,
    pristine: &MethodBody,
    layers: &[Layer],
) -> Result<LoadedMethod> {
    let mut body = pristine.clone();
    for layer in layers {
        layer.manipulator.manipulate(&mut body)?;
    }
    load(token, descriptor, body)
}

/// In-process host for IL and native methods.
///
/// # Examples
///
/// ```rust
/// use dotpatch::prelude::*;
///
/// let mut runtime = Runtime::new();
/// let add = runtime.define_method(
///     MethodDescriptor::new("Add", "Calculator")
///         .param("a", TypeSig::I32)
///         .param("b", TypeSig::I32)
///         .returns(TypeSig::I32),
///     MethodBodyBuilder::new()
///         .implementation(|asm| {
///             asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
///             Ok(())
///         })
///         .build()?,
/// )?;
///
/// let outcome = runtime.invoke(add, &[EmValue::I32(4), EmValue::I32(2)])?;
/// assert_eq!(outcome.value(), Some(&EmValue::I32(6)));
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct Runtime {
    config: EmulationConfig,
    table: MethodTable,
    heap: ManagedHeap,
    console: Vec<String>,
    next_method: u32,
    next_native: u32,
    free_natives: Vec<u32>,
    next_detour: u64,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EmulationConfig::default())
    }

    /// Creates a runtime with `config`.
    #[must_use]
    pub fn with_config(config: EmulationConfig) -> Self {
        Runtime {
            heap: ManagedHeap::new(config.limits.max_heap_objects),
            config,
            table: MethodTable::default(),
            console: Vec::new(),
            next_method: 0,
            next_native: 0,
            free_natives: Vec::new(),
            next_detour: 0,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EmulationConfig {
        &self.config
    }

    /// Defines an IL method and returns its token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `body` does not load against `descriptor` or the method
    /// table is full.
    pub fn define_method(&mut self, descriptor: MethodDescriptor, body: MethodBody) -> Result<Token> {
        if self.next_method >= MAX_ROW {
            return Err(malformed_error!("method table is full ({} rows)", MAX_ROW));
        }
        let token = Token::from_parts(TABLE_METHOD_DEF, self.next_method + 1);
        let effective = Arc::new(load(token, &descriptor, body.clone())?);
        self.next_method += 1;

        debug!("defined {} as {}", descriptor.full_name(), token);
        self.table.methods.insert(
            token,
            MethodRecord {
                descriptor,
                pristine: body,
                layers: Vec::new(),
                effective,
            },
        );
        Ok(token)
    }

    /// Defines a native method taking `arity` arguments and returns its token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if every native row is in use.
    pub fn define_native<F>(
        &mut self,
        name: &str,
        arity: usize,
        returns_value: bool,
        f: F,
    ) -> Result<Token>
    where
        F: Fn(&mut NativeCall<'_>) -> Result<CallOutcome> + Send + Sync + 'static,
    {
        self.register_native(NativeMethod {
            name: name.to_string(),
            arity,
            returns_value,
            handler: Arc::new(f),
        })
    }

    /// Rows freed by released hooks are handed out again before new ones.
    fn register_native(&mut self, native: NativeMethod) -> Result<Token> {
        let row = match self.free_natives.pop() {
            Some(row) => row,
            None if self.next_native >= MAX_ROW => {
                return Err(malformed_error!("native table is full ({} rows)", MAX_ROW))
            }
            None => {
                self.next_native += 1;
                self.next_native
            }
        };

        let token = Token::from_parts(TABLE_MEMBER_REF, row);
        debug!("defined native {} as {}", native.name, token);
        self.table.natives.insert(token, native);
        Ok(token)
    }

    /// Number of registered native methods, imported hooks included.
    #[must_use]
    pub fn native_count(&self) -> usize {
        self.table.natives.len()
    }

    /// Metadata of the IL method `token`.
    #[must_use]
    pub fn descriptor(&self, token: Token) -> Option<&MethodDescriptor> {
        self.table.methods.get(&token).map(|record| &record.descriptor)
    }

    /// The body `token` currently executes, with all layers applied.
    #[must_use]
    pub fn body(&self, token: Token) -> Option<&MethodBody> {
        self.table
            .methods
            .get(&token)
            .map(|record| &record.effective.body)
    }

    /// The body `token` was defined with.
    #[must_use]
    pub fn pristine_body(&self, token: Token) -> Option<&MethodBody> {
        self.table.methods.get(&token).map(|record| &record.pristine)
    }

    /// Installed layers of `token`, in installation order.
    #[must_use]
    pub fn detours(&self, token: Token) -> Vec<(DetourId, &str)> {
        self.table
            .methods
            .get(&token)
            .map(|record| {
                record
                    .layers
                    .iter()
                    .map(|layer| (layer.id, layer.manipulator.name()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Calls `token` with `args`.
    ///
    /// A managed exception leaving the method is a successful call with
    /// [`CallOutcome::Throw`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Emulation`] if execution fails (unknown method, wrong argument count,
    /// type confusion, exhausted limits) or the error a native method returned.
    pub fn invoke(&mut self, token: Token, args: &[EmValue]) -> Result<CallOutcome> {
        let mut interpreter =
            Interpreter::new(&self.table, &mut self.heap, &mut self.console, &self.config);
        let outcome = interpreter.run(token, args.to_vec());
        debug!(
            "invoked {} ({} instructions)",
            token,
            interpreter.executed()
        );
        outcome
    }

    /// Lines written through [`NativeCall::write_line`].
    #[must_use]
    pub fn console(&self) -> &[String] {
        &self.console
    }

    /// Returns and clears the console.
    pub fn take_console(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }

    /// The managed heap.
    #[must_use]
    pub fn heap(&self) -> &ManagedHeap {
        &self.heap
    }

    /// The managed heap, mutably (for allocating receivers and arguments).
    pub fn heap_mut(&mut self) -> &mut ManagedHeap {
        &mut self.heap
    }

    /// Renders the signature, the layers and the executing body of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] for unknown tokens.
    pub fn dump(&self, token: Token) -> Result<String> {
        let record = self
            .table
            .methods
            .get(&token)
            .ok_or(Error::MethodNotFound(token))?;

        let mut out = String::new();
        let _ = writeln!(out, "// {} {}", token, record.descriptor);
        for layer in &record.layers {
            let _ = writeln!(out, "// detour {}: {}", layer.id, layer.manipulator.name());
        }
        out.push_str(&record.effective.body.dump());
        Ok(out)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl DetourHost for Runtime {
    fn describe(&self, method: Token) -> Result<MethodDescriptor> {
        self.descriptor(method)
            .cloned()
            .ok_or(Error::MethodNotFound(method))
    }

    fn import_hook(&mut self, hook: &Hook) -> Result<Token> {
        self.register_native(NativeMethod {
            name: hook.name().to_string(),
            arity: hook.parameters().len(),
            returns_value: hook.return_kind().produces_value(),
            handler: Arc::clone(hook.handler()),
        })
    }

    fn release_hook(&mut self, hook: Token) -> Result<()> {
        let native = self
            .table
            .natives
            .remove(&hook)
            .ok_or(Error::MethodNotFound(hook))?;
        self.free_natives.push(hook.row());
        debug!("released native {} ({})", native.name, hook);
        Ok(())
    }

    fn install(&mut self, method: Token, manipulator: Arc<dyn Manipulator>) -> Result<DetourId> {
        let record = self
            .table
            .methods
            .get_mut(&method)
            .ok_or(Error::MethodNotFound(method))?;

        let id = DetourId(self.next_detour + 1);
        record.layers.push(Layer { id, manipulator });
        match rebuild(method, &record.descriptor, &record.pristine, &record.layers) {
            Ok(effective) => {
                record.effective = Arc::new(effective);
                self.next_detour += 1;
                debug!(
                    "installed detour {} on {} ({} layers)",
                    id,
                    record.descriptor.full_name(),
                    record.layers.len()
                );
                Ok(id)
            }
            Err(err) => {
                record.layers.pop();
                Err(err)
            }
        }
    }

    fn uninstall(&mut self, method: Token, detour: DetourId) -> Result<()> {
        let record = self
            .table
            .methods
            .get_mut(&method)
            .ok_or(Error::MethodNotFound(method))?;
        let index = record
            .layers
            .iter()
            .position(|layer| layer.id == detour)
            .ok_or(Error::DetourNotFound { method, detour })?;

        let removed = record.layers.remove(index);

        // upper layers are re-applied to a different body; those that no longer apply are dropped
        let mut body = record.pristine.clone();
        let mut kept = Vec::with_capacity(record.layers.len());
        for layer in record.layers.drain(..) {
            let mut candidate = body.clone();
            match layer
                .manipulator
                .manipulate(&mut candidate)
                .and_then(|()| candidate.validate())
            {
                Ok(()) => {
                    body = candidate;
                    kept.push(layer);
                }
                Err(err) => warn!(
                    "dropping detour {} ({}) on {}: {}",
                    layer.id,
                    layer.manipulator.name(),
                    record.descriptor.full_name(),
                    err
                ),
            }
        }
        record.layers = kept;

        match load(method, &record.descriptor, body) {
            Ok(effective) => record.effective = Arc::new(effective),
            Err(err) => {
                warn!(
                    "{} does not load after removing detour {}, reverting to its pristine body: {}",
                    record.descriptor.full_name(),
                    removed.id,
                    err
                );
                record.layers.clear();
                record.effective = Arc::new(load(
                    method,
                    &record.descriptor,
                    record.pristine.clone(),
                )?);
            }
        }

        debug!(
            "removed detour {} from {} ({} layers left)",
            removed.id,
            record.descriptor.full_name(),
            record.layers.len()
        );
        Ok(())
    }
}
