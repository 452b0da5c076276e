//! Native (Rust closure) methods.
//!
//! Hooks, and any other method defined with [`crate::emulation::Runtime::define_native`], run as
//! native code. They receive a [`NativeCall`] giving access to their arguments, to storage behind
//! by-reference arguments, to the managed heap and to the console sink.

use std::fmt;

use crate::{
    emulation::{
        frame::{load_indirect, store_indirect, Frame},
        EmValue, EmulationError, ManagedHeap,
    },
    patch::NativeFn,
    Result,
};

/// A method implemented by a Rust closure.
#[derive(Clone)]
pub struct NativeMethod {
    /// Name used in diagnostics
    pub name: String,
    /// Number of arguments taken from the evaluation stack
    pub arity: usize,
    /// Whether a call leaves a value on the stack
    pub returns_value: bool,
    /// The implementation
    pub handler: NativeFn,
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("returns_value", &self.returns_value)
            .finish_non_exhaustive()
    }
}

/// The context of one native call.
///
/// # Examples
///
/// ```rust
/// use dotpatch::emulation::{CallOutcome, EmValue, Runtime};
///
/// let mut runtime = Runtime::new();
/// let log = runtime.define_native("Log", 2, false, |call| {
///     let a = call.arg(0)?.as_i32()?;
///     let b = call.arg(1)?.as_i32()?;
///     call.write_line(format!("{a} + {b}"));
///     Ok(CallOutcome::Return(None))
/// })?;
///
/// runtime.invoke(log, &[EmValue::I32(4), EmValue::I32(2)])?;
/// assert_eq!(runtime.console(), ["4 + 2"]);
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct NativeCall<'a> {
    name: &'a str,
    args: Vec<EmValue>,
    frames: &'a mut [Frame],
    heap: &'a mut ManagedHeap,
    console: &'a mut Vec<String>,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(
        name: &'a str,
        args: Vec<EmValue>,
        frames: &'a mut [Frame],
        heap: &'a mut ManagedHeap,
        console: &'a mut Vec<String>,
    ) -> Self {
        NativeCall {
            name,
            args,
            frames,
            heap,
            console,
        }
    }

    /// Name of the called method.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Number of arguments.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// All arguments as passed (pointers are not dereferenced).
    #[must_use]
    pub fn args(&self) -> &[EmValue] {
        &self.args
    }

    /// Argument `index` as passed.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::ArgumentIndexOutOfBounds`] for a missing argument.
    pub fn arg(&self, index: usize) -> Result<EmValue> {
        self.args.get(index).cloned().ok_or_else(|| {
            EmulationError::ArgumentIndexOutOfBounds {
                index,
                count: self.args.len(),
            }
            .into()
        })
    }

    /// Argument `index`, reading through it if it is a managed pointer.
    ///
    /// # Errors
    ///
    /// Returns an error for a missing argument or a dangling pointer.
    pub fn value(&self, index: usize) -> Result<EmValue> {
        match self.arg(index)? {
            EmValue::Pointer(pointer) => load_indirect(&*self.frames, pointer),
            value => Ok(value),
        }
    }

    /// Stores `value` through the by-reference argument `index`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] if the argument is not a managed pointer.
    pub fn set(&mut self, index: usize, value: EmValue) -> Result<()> {
        match self.arg(index)? {
            EmValue::Pointer(pointer) => store_indirect(&mut *self.frames, pointer, value),
            other => Err(other.mismatch("set", "pointer")),
        }
    }

    /// Reads `field` of the object passed as argument `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is not an object or the field does not exist.
    pub fn field(&self, index: usize, field: &str) -> Result<EmValue> {
        let object = self.value(index)?.as_object()?;
        self.heap.get_field(object, field)
    }

    /// Writes `field` of the object passed as argument `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is not an object.
    pub fn set_field(&mut self, index: usize, field: &str, value: EmValue) -> Result<()> {
        let object = self.value(index)?.as_object()?;
        self.heap.set_field(object, field, value)
    }

    /// Appends a line to the runtime's console sink.
    pub fn write_line(&mut self, text: impl Into<String>) {
        self.console.push(text.into());
    }

    /// The managed heap.
    #[must_use]
    pub fn heap(&self) -> &ManagedHeap {
        &*self.heap
    }

    /// The managed heap, mutably.
    pub fn heap_mut(&mut self) -> &mut ManagedHeap {
        &mut *self.heap
    }
}
