//! Runtime values of the reference runtime.

use std::{fmt, sync::Arc};

use crate::{emulation::EmulationError, metadata::method::TypeSig, Result};

/// Exception type raised for integer division by zero.
pub const DIVIDE_BY_ZERO: &str = "System.DivideByZeroException";

/// Exception type raised when dereferencing `null`.
pub const NULL_REFERENCE: &str = "System.NullReferenceException";

/// Runtime value during emulation.
///
/// `EmValue` represents everything that can live on the evaluation stack, in an argument slot,
/// in a local variable or in an object field.
///
/// | CIL Type | EmValue Variant |
/// |----------|-----------------|
/// | `bool` | [`EmValue::Bool`] |
/// | `int32` | [`EmValue::I32`] |
/// | `int64` | [`EmValue::I64`] |
/// | `float64` | [`EmValue::F64`] |
/// | `string` | [`EmValue::String`] |
/// | Object reference | [`EmValue::Object`] |
/// | Exception object | [`EmValue::Exception`] |
/// | `null` | [`EmValue::Null`] |
/// | Managed pointer | [`EmValue::Pointer`] |
///
/// Comparison instructions push `int32` as in CIL; branch instructions accept both
/// [`EmValue::Bool`] and integers.
#[derive(Clone, Debug, PartialEq)]
pub enum EmValue {
    /// Null reference.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit floating point.
    F64(f64),
    /// Immutable string.
    String(Arc<str>),
    /// Reference to a heap object.
    Object(HeapRef),
    /// Exception object. Clones share identity, so a rethrown exception is the same object.
    Exception(Arc<EmException>),
    /// Managed pointer (by-reference argument, address of a local).
    Pointer(ManagedPointer),
}

impl EmValue {
    /// Creates an exception value.
    #[must_use]
    pub fn exception(type_name: &str, message: &str) -> Self {
        EmValue::Exception(Arc::new(EmException::new(type_name, message)))
    }

    /// Creates a string value.
    #[must_use]
    pub fn string(value: &str) -> Self {
        EmValue::String(Arc::from(value))
    }

    /// The default value of `ty`, as used for zero-initialized locals.
    #[must_use]
    pub fn default_for(ty: &TypeSig) -> Self {
        match ty {
            TypeSig::Bool => EmValue::Bool(false),
            TypeSig::I32 => EmValue::I32(0),
            TypeSig::I64 => EmValue::I64(0),
            TypeSig::F64 => EmValue::F64(0.0),
            TypeSig::Void | TypeSig::String | TypeSig::Class(_) | TypeSig::Exception => {
                EmValue::Null
            }
        }
    }

    /// Short type name used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            EmValue::Null => "null",
            EmValue::Bool(_) => "bool",
            EmValue::I32(_) => "int32",
            EmValue::I64(_) => "int64",
            EmValue::F64(_) => "float64",
            EmValue::String(_) => "string",
            EmValue::Object(_) => "object",
            EmValue::Exception(_) => "exception",
            EmValue::Pointer(_) => "pointer",
        }
    }

    /// Returns `true` for [`EmValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, EmValue::Null)
    }

    /// Truth value as seen by `brtrue` / `brfalse`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for floats.
    pub fn is_truthy(&self) -> Result<bool> {
        match self {
            EmValue::Null => Ok(false),
            EmValue::Bool(value) => Ok(*value),
            EmValue::I32(value) => Ok(*value != 0),
            EmValue::I64(value) => Ok(*value != 0),
            EmValue::String(_)
            | EmValue::Object(_)
            | EmValue::Exception(_)
            | EmValue::Pointer(_) => Ok(true),
            EmValue::F64(_) => Err(self.mismatch("condition", "int32, bool or reference")),
        }
    }

    /// Reads an `int32` (a `bool` reads as 0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for any other value.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            EmValue::I32(value) => Ok(*value),
            EmValue::Bool(value) => Ok(i32::from(*value)),
            _ => Err(self.mismatch("as_i32", "int32")),
        }
    }

    /// Reads an `int64`, widening `int32`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for any other value.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            EmValue::I64(value) => Ok(*value),
            EmValue::I32(value) => Ok(i64::from(*value)),
            _ => Err(self.mismatch("as_i64", "int64")),
        }
    }

    /// Reads a `bool` (integers are true when non-zero).
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for any other value.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            EmValue::Bool(value) => Ok(*value),
            EmValue::I32(value) => Ok(*value != 0),
            _ => Err(self.mismatch("as_bool", "bool")),
        }
    }

    /// Reads a string.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for any other value.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            EmValue::String(value) => Ok(value),
            _ => Err(self.mismatch("as_str", "string")),
        }
    }

    /// Reads a heap reference.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for any other value.
    pub fn as_object(&self) -> Result<HeapRef> {
        match self {
            EmValue::Object(heap_ref) => Ok(*heap_ref),
            _ => Err(self.mismatch("as_object", "object")),
        }
    }

    /// Reads an exception, `None` for `null`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::TypeMismatch`] for any other value.
    pub fn as_exception(&self) -> Result<Option<&EmException>> {
        match self {
            EmValue::Exception(exception) => Ok(Some(exception)),
            EmValue::Null => Ok(None),
            _ => Err(self.mismatch("as_exception", "exception")),
        }
    }

    pub(crate) fn mismatch(&self, operation: &'static str, expected: &'static str) -> crate::Error {
        EmulationError::TypeMismatch {
            operation,
            expected,
            found: self.type_name(),
        }
        .into()
    }
}

impl From<bool> for EmValue {
    fn from(value: bool) -> Self {
        EmValue::Bool(value)
    }
}

impl From<i32> for EmValue {
    fn from(value: i32) -> Self {
        EmValue::I32(value)
    }
}

impl From<i64> for EmValue {
    fn from(value: i64) -> Self {
        EmValue::I64(value)
    }
}

impl From<f64> for EmValue {
    fn from(value: f64) -> Self {
        EmValue::F64(value)
    }
}

impl From<&str> for EmValue {
    fn from(value: &str) -> Self {
        EmValue::string(value)
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::Null => write!(f, "null"),
            EmValue::Bool(value) => write!(f, "{value}"),
            EmValue::I32(value) => write!(f, "{value}"),
            EmValue::I64(value) => write!(f, "{value}L"),
            EmValue::F64(value) => write!(f, "{value}"),
            EmValue::String(value) => write!(f, "{value:?}"),
            EmValue::Object(heap_ref) => write!(f, "{heap_ref}"),
            EmValue::Exception(exception) => write!(f, "{exception}"),
            EmValue::Pointer(pointer) => write!(f, "{pointer}"),
        }
    }
}

/// A managed exception object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmException {
    /// Full name of the exception type
    pub type_name: String,
    /// Exception message
    pub message: String,
}

impl EmException {
    /// Creates an exception object.
    #[must_use]
    pub fn new(type_name: &str, message: &str) -> Self {
        EmException {
            type_name: type_name.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for EmException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Reference to a heap-allocated object.
///
/// Two `HeapRef` values are equal if they point to the same heap object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapRef(pub(crate) u64);

impl HeapRef {
    /// Creates a new heap reference with the given ID.
    #[must_use]
    pub fn new(id: u64) -> Self {
        HeapRef(id)
    }

    /// Returns the internal ID of this heap reference.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({})", self.0)
    }
}

/// What a managed pointer points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerTarget {
    /// An argument slot
    Argument(u16),
    /// A local variable
    Local(u16),
}

/// Managed pointer to a storage location of a live frame.
///
/// Created by `ldarga` / `ldloca`, consumed by `ldind` / `stind` and by native methods through
/// [`crate::emulation::NativeCall::set`]. The pointer stays valid while its frame is on the
/// call stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ManagedPointer {
    /// Index of the frame on the call stack (0 = outermost)
    pub frame: usize,
    /// Slot within the frame
    pub target: PointerTarget,
}

impl ManagedPointer {
    /// Pointer to argument `index` of `frame`.
    #[must_use]
    pub fn to_argument(frame: usize, index: u16) -> Self {
        ManagedPointer {
            frame,
            target: PointerTarget::Argument(index),
        }
    }

    /// Pointer to local `index` of `frame`.
    #[must_use]
    pub fn to_local(frame: usize, index: u16) -> Self {
        ManagedPointer {
            frame,
            target: PointerTarget::Local(index),
        }
    }
}

impl fmt::Display for ManagedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            PointerTarget::Argument(index) => write!(f, "&A_{index}@{}", self.frame),
            PointerTarget::Local(index) => write!(f, "&V_{index}@{}", self.frame),
        }
    }
}

/// How a call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    /// Normal return, with the value for non-void methods
    Return(Option<EmValue>),
    /// A managed exception left the method
    Throw(EmValue),
}

impl CallOutcome {
    /// The returned value, if the call returned one.
    #[must_use]
    pub fn value(&self) -> Option<&EmValue> {
        match self {
            CallOutcome::Return(value) => value.as_ref(),
            CallOutcome::Throw(_) => None,
        }
    }

    /// The thrown exception, if the call threw.
    #[must_use]
    pub fn exception(&self) -> Option<&EmException> {
        match self {
            CallOutcome::Throw(EmValue::Exception(exception)) => Some(exception),
            _ => None,
        }
    }

    /// Returns `true` if a managed exception left the method.
    #[must_use]
    pub fn is_throw(&self) -> bool {
        matches!(self, CallOutcome::Throw(_))
    }
}
