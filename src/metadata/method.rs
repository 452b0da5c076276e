//! Method descriptors: the read-only metadata the rewriting engine needs about a target method.
//!
//! A [`MethodDescriptor`] carries the method's name, owning type, static/instance flag, the
//! ordered parameter list and the return type. The rewriting engine queries it exactly once per
//! session to build its parameter binding table.
//!
//! # Argument Slots
//!
//! Argument slot indices follow the CLI calling convention:
//!
//! | Method kind | Slot 0 | Slots 1..=N |
//! |-------------|--------|-------------|
//! | instance    | receiver (`this`) | declared parameters |
//! | static      | first parameter | remaining parameters |
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::method::{MethodDescriptor, TypeSig};
//!
//! let add = MethodDescriptor::new("Add", "Calculator")
//!     .instance()
//!     .param("a", TypeSig::I32)
//!     .param("b", TypeSig::I32)
//!     .returns(TypeSig::I32);
//!
//! assert_eq!(add.parameter_slot(1), Some(2));
//! assert_eq!(add.slot_count(), 3);
//! assert!(add.returns_value());
//! ```

use std::fmt;

/// The type of a parameter, local variable or return value.
///
/// This is a deliberately small type lattice: the rewriting engine only needs to know whether a
/// method produces a value and how to default-initialize synthesized locals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value (only meaningful as a return type)
    Void,
    /// `System.Boolean`
    Bool,
    /// `System.Int32`
    I32,
    /// `System.Int64`
    I64,
    /// `System.Double`
    F64,
    /// `System.String`
    String,
    /// A reference type, identified by its full name
    Class(String),
    /// `System.Exception` or any type derived from it
    Exception,
}

impl TypeSig {
    /// Returns `true` for [`TypeSig::Void`]
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// Returns `true` if values of this type are references (default `null`)
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeSig::String | TypeSig::Class(_) | TypeSig::Exception)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => write!(f, "void"),
            TypeSig::Bool => write!(f, "bool"),
            TypeSig::I32 => write!(f, "int32"),
            TypeSig::I64 => write!(f, "int64"),
            TypeSig::F64 => write!(f, "float64"),
            TypeSig::String => write!(f, "string"),
            TypeSig::Class(name) => write!(f, "class {name}"),
            TypeSig::Exception => write!(f, "class System.Exception"),
        }
    }
}

/// A single declared parameter of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Declared name, used for name-based hook binding
    pub name: String,
    /// Declared type
    pub ty: TypeSig,
    /// Whether the parameter is passed by reference (`ref`/`out`)
    pub by_ref: bool,
}

/// Read-only metadata describing a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method name
    pub name: String,
    /// Full name of the owning type
    pub declaring_type: String,
    /// `true` for static methods (no receiver slot)
    pub is_static: bool,
    /// Declared parameters in order
    pub parameters: Vec<ParameterInfo>,
    /// Return type, [`TypeSig::Void`] for methods without a result
    pub return_type: TypeSig,
}

impl MethodDescriptor {
    /// Creates a static, void-returning, parameterless descriptor.
    #[must_use]
    pub fn new(name: &str, declaring_type: &str) -> Self {
        MethodDescriptor {
            name: name.to_string(),
            declaring_type: declaring_type.to_string(),
            is_static: true,
            parameters: Vec::new(),
            return_type: TypeSig::Void,
        }
    }

    /// Marks the method as an instance method (slot 0 holds the receiver).
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// Appends a by-value parameter.
    #[must_use]
    pub fn param(mut self, name: &str, ty: TypeSig) -> Self {
        self.parameters.push(ParameterInfo {
            name: name.to_string(),
            ty,
            by_ref: false,
        });
        self
    }

    /// Appends a by-reference parameter.
    #[must_use]
    pub fn param_by_ref(mut self, name: &str, ty: TypeSig) -> Self {
        self.parameters.push(ParameterInfo {
            name: name.to_string(),
            ty,
            by_ref: true,
        });
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, ty: TypeSig) -> Self {
        self.return_type = ty;
        self
    }

    /// Returns `true` if the method produces a value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        !self.return_type.is_void()
    }

    /// Returns the argument slot of the declared parameter at `index`.
    #[must_use]
    pub fn parameter_slot(&self, index: usize) -> Option<u16> {
        if index >= self.parameters.len() {
            return None;
        }

        let slot = if self.is_static { index } else { index + 1 };
        u16::try_from(slot).ok()
    }

    /// Total number of argument slots, including the receiver for instance methods.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.parameters.len() + usize::from(!self.is_static)
    }

    /// `Type::Name` form used in diagnostics.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.declaring_type.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.declaring_type, self.name)
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_static {
            write!(f, "instance ")?;
        }
        write!(f, "{} {}(", self.return_type, self.full_name())?;
        for (index, param) in self.parameters.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            if param.by_ref {
                write!(f, "{}& {}", param.ty, param.name)?;
            } else {
                write!(f, "{} {}", param.ty, param.name)?;
            }
        }
        write!(f, ")")
    }
}
