//! Fluent construction of method bodies.
//!
//! [`MethodBodyBuilder`] collects locals, an implementation closure and exception regions, and
//! produces a validated [`MethodBody`]. The closure receives an [`InstructionAssembler`], which
//! offers one chainable method per opcode and resolves branch targets by name.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::{assembly::MethodBodyBuilder, metadata::method::TypeSig};
//!
//! // static int Abs(int x) => x < 0 ? -x : x;
//! let body = MethodBodyBuilder::new()
//!     .local("result", TypeSig::I32)
//!     .implementation(|asm| {
//!         asm.ldarg(0)?
//!             .ldc_i4(0)?
//!             .bge("positive")?
//!             .ldarg(0)?
//!             .neg()?
//!             .ret()?
//!             .label("positive")?
//!             .ldarg(0)?
//!             .ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! assert_eq!(body.len(), 8);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        body::MethodBody,
        exceptions::{ExceptionHandler, ExceptionHandlerFlags},
        instruction::{Immediate, Label, Operand},
        opcodes::OpCode,
    },
    metadata::{method::TypeSig, token::Token},
    Result,
};

/// Type alias for method body implementation closures
type ImplementationFn = Box<dyn FnOnce(&mut InstructionAssembler) -> Result<()>>;

macro_rules! simple_ops {
    ($($(#[$doc:meta])* $name:ident => $opcode:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            ///
            /// Returns an error if a pending label cannot be marked.
            pub fn $name(&mut self) -> Result<&mut Self> {
                self.emit(OpCode::$opcode, Operand::None)
            }
        )*
    };
}

macro_rules! branch_ops {
    ($($(#[$doc:meta])* $name:ident => $opcode:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            ///
            /// The target label may be defined before or after the branch.
            ///
            /// # Errors
            ///
            /// Returns an error if a pending label cannot be marked.
            pub fn $name(&mut self, target: &str) -> Result<&mut Self> {
                let label = self.label_for(target);
                self.emit(OpCode::$opcode, Operand::Label(label))
            }
        )*
    };
}

/// Appends instructions to a method body with named labels.
///
/// Labels declared with [`InstructionAssembler::label`] bind to the next emitted instruction.
pub struct InstructionAssembler {
    body: MethodBody,
    labels: HashMap<String, Label>,
    pending: Vec<(String, Label)>,
}

impl InstructionAssembler {
    /// Creates an assembler over an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::with_body(MethodBody::new())
    }

    /// Creates an assembler that appends to an existing body.
    #[must_use]
    pub fn with_body(body: MethodBody) -> Self {
        InstructionAssembler {
            body,
            labels: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Appends an instruction and marks any pending labels at it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the operand does not fit the opcode.
    pub fn emit(&mut self, opcode: OpCode, operand: Operand) -> Result<&mut Self> {
        let id = self.body.push(opcode, operand)?;
        for (_, label) in self.pending.drain(..) {
            self.body.mark_label(label, id)?;
        }
        Ok(self)
    }

    /// Declares `name` at the position of the next emitted instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the label was already declared.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        let label = self.label_for(name);
        let declared = self.body.label_target(label).is_some()
            || self.pending.iter().any(|(_, pending)| *pending == label);
        if declared {
            return Err(malformed_error!("label '{}' is declared twice", name));
        }

        self.pending.push((name.to_string(), label));
        Ok(self)
    }

    /// Current number of emitted instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns `true` if nothing has been emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Finishes assembly and returns the body together with the label name table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a label was declared after the last instruction
    /// or a branch targets a label that was never declared.
    pub fn finish(self) -> Result<(MethodBody, HashMap<String, Label>)> {
        if let Some((name, _)) = self.pending.first() {
            return Err(malformed_error!(
                "label '{}' is not followed by an instruction",
                name
            ));
        }

        for (name, label) in &self.labels {
            if self.body.label_target(*label).is_none() {
                return Err(malformed_error!("label '{}' is never declared", name));
            }
        }

        Ok((self.body, self.labels))
    }

    fn label_for(&mut self, name: &str) -> Label {
        if let Some(label) = self.labels.get(name) {
            return *label;
        }

        let label = self.body.define_label();
        self.labels.insert(name.to_string(), label);
        label
    }

    /// Load argument `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldarg(&mut self, slot: u16) -> Result<&mut Self> {
        self.emit(OpCode::Ldarg, Operand::Argument(slot))
    }

    /// Load the address of argument `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldarga(&mut self, slot: u16) -> Result<&mut Self> {
        self.emit(OpCode::Ldarga, Operand::Argument(slot))
    }

    /// Store into argument `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn starg(&mut self, slot: u16) -> Result<&mut Self> {
        self.emit(OpCode::Starg, Operand::Argument(slot))
    }

    /// Load local `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(OpCode::Ldloc, Operand::Local(index))
    }

    /// Load the address of local `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldloca(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(OpCode::Ldloca, Operand::Local(index))
    }

    /// Store into local `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(OpCode::Stloc, Operand::Local(index))
    }

    /// Push an `int32` constant.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        self.emit(OpCode::LdcI4, Operand::Immediate(Immediate::Int32(value)))
    }

    /// Push an `int64` constant.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit(OpCode::LdcI8, Operand::Immediate(Immediate::Int64(value)))
    }

    /// Push a `float64` constant.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldc_r8(&mut self, value: f64) -> Result<&mut Self> {
        self.emit(OpCode::LdcR8, Operand::Immediate(Immediate::Float64(value)))
    }

    /// Push a string literal.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldstr(&mut self, value: &str) -> Result<&mut Self> {
        self.emit(OpCode::Ldstr, Operand::String(value.to_string()))
    }

    /// Call `method`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn call(&mut self, method: Token) -> Result<&mut Self> {
        self.emit(OpCode::Call, Operand::Method(method))
    }

    /// Load instance field `name` of the object on the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn ldfld(&mut self, name: &str) -> Result<&mut Self> {
        self.emit(OpCode::Ldfld, Operand::Field(name.to_string()))
    }

    /// Store into instance field `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending label cannot be marked.
    pub fn stfld(&mut self, name: &str) -> Result<&mut Self> {
        self.emit(OpCode::Stfld, Operand::Field(name.to_string()))
    }

    simple_ops! {
        /// Do nothing.
        nop => Nop,
        /// Push a null reference.
        ldnull => Ldnull,
        /// Duplicate the top of the stack.
        dup => Dup,
        /// Discard the top of the stack.
        pop => Pop,
        /// Add the two top values.
        add => Add,
        /// Subtract the top value from the one below it.
        sub => Sub,
        /// Multiply the two top values.
        mul => Mul,
        /// Divide; division by zero raises `System.DivideByZeroException`.
        div => Div,
        /// Remainder of a division.
        rem => Rem,
        /// Negate the top value.
        neg => Neg,
        /// Bitwise and.
        and => And,
        /// Bitwise or.
        or => Or,
        /// Bitwise exclusive or.
        xor => Xor,
        /// Compare for equality.
        ceq => Ceq,
        /// Compare greater than.
        cgt => Cgt,
        /// Compare less than.
        clt => Clt,
        /// Return from the method.
        ret => Ret,
        /// Throw the exception on top of the stack.
        throw => Throw,
        /// Rethrow the exception being handled.
        rethrow => Rethrow,
        /// End a finally block.
        endfinally => Endfinally,
        /// Load through a managed pointer.
        ldind => Ldind,
        /// Store through a managed pointer.
        stind => Stind,
    }

    branch_ops! {
        /// Unconditional branch.
        br => Br,
        /// Branch if true.
        brtrue => Brtrue,
        /// Branch if false.
        brfalse => Brfalse,
        /// Branch if equal.
        beq => Beq,
        /// Branch if not equal.
        bne_un => BneUn,
        /// Branch if less than.
        blt => Blt,
        /// Branch if greater than.
        bgt => Bgt,
        /// Branch if less than or equal.
        ble => Ble,
        /// Branch if greater than or equal.
        bge => Bge,
        /// Leave a protected region.
        leave => Leave,
    }
}

impl Default for InstructionAssembler {
    fn default() -> Self {
        Self::new()
    }
}

struct RegionSpec {
    flags: ExceptionHandlerFlags,
    try_start: String,
    handler_start: String,
    handler_end: String,
    catch_type: Option<String>,
}

/// Builder for method bodies.
///
/// Exception regions are expressed with label names declared by the implementation closure.
/// The protected region runs from `try_start` up to `handler_start`, the handler from
/// `handler_start` up to `handler_end`. Regions must be added innermost first.
pub struct MethodBodyBuilder {
    /// Local variable definitions
    locals: Vec<(String, TypeSig)>,

    /// The implementation closure
    implementation: Option<ImplementationFn>,

    /// Exception regions, by label name
    regions: Vec<RegionSpec>,
}

impl MethodBodyBuilder {
    /// Create a new method body builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locals: Vec::new(),
            implementation: None,
            regions: Vec::new(),
        }
    }

    /// Add a local variable to the method.
    ///
    /// Local variables are indexed in the order they are added, starting from 0.
    #[must_use]
    pub fn local(mut self, name: &str, local_type: TypeSig) -> Self {
        self.locals.push((name.to_string(), local_type));
        self
    }

    /// Add a catch clause; `None` catches every exception.
    #[must_use]
    pub fn catch_handler(
        mut self,
        try_start: &str,
        handler_start: &str,
        handler_end: &str,
        catch_type: Option<&str>,
    ) -> Self {
        self.regions.push(RegionSpec {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_start.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    /// Add a finally clause.
    #[must_use]
    pub fn finally_handler(mut self, try_start: &str, handler_start: &str, handler_end: &str) -> Self {
        self.regions.push(RegionSpec {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_start.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            catch_type: None,
        });
        self
    }

    /// Set the method implementation using the instruction assembler.
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Build and validate the method body.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No implementation was provided
    /// - The implementation closure returns an error
    /// - A region refers to an undeclared label
    /// - The resulting body fails [`MethodBody::validate`]
    pub fn build(self) -> Result<MethodBody> {
        let MethodBodyBuilder {
            locals,
            implementation,
            regions,
        } = self;

        let implementation = implementation
            .ok_or_else(|| malformed_error!("Method body implementation is required"))?;

        let mut body = MethodBody::new();
        for (name, ty) in locals {
            body.add_local(&name, ty)?;
        }

        let mut assembler = InstructionAssembler::with_body(body);
        implementation(&mut assembler)?;
        let (mut body, labels) = assembler.finish()?;

        for region in regions {
            let resolve = |name: &str| {
                labels
                    .get(name)
                    .and_then(|label| body.label_target(*label))
                    .ok_or_else(|| malformed_error!("exception region uses unknown label '{}'", name))
            };

            let try_start = resolve(&region.try_start)?;
            let handler_start = resolve(&region.handler_start)?;
            let handler_end = resolve(&region.handler_end)?;

            body.exception_handlers.push(ExceptionHandler {
                flags: region.flags,
                try_start,
                try_end: handler_start,
                handler_start,
                handler_end,
                catch_type: region.catch_type,
            });
        }

        body.validate()?;
        Ok(body)
    }
}

impl Default for MethodBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
