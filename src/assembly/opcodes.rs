//! The supported instruction set and its static metadata.
//!
//! [`OpCode`] is the subset of the CIL instruction set understood by the rewriting engine and
//! the reference runtime. Every opcode knows its mnemonic, the kind of operand it takes, how it
//! affects control flow and (where fixed) how it affects the evaluation stack.
//!
//! Unlike raw CIL there are no short or macro forms: `ldarg.0`, `ldarg.s 5` and `ldarg 300` all
//! map to [`OpCode::Ldarg`] with an [`crate::assembly::Operand::Argument`] operand. Encoding to
//! the densest byte form is a concern of whatever writes the body back to a PE image.

use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::assembly::instruction::{FlowType, OperandType, StackBehavior};

/// An instruction opcode.
///
/// The string form of every variant is its CIL mnemonic, so opcodes can be parsed from and
/// rendered to text:
///
/// ```rust
/// use dotpatch::assembly::OpCode;
/// use std::str::FromStr;
///
/// assert_eq!(OpCode::from_str("bne.un").unwrap(), OpCode::BneUn);
/// assert_eq!(OpCode::LdcI4.to_string(), "ldc.i4");
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
pub enum OpCode {
    /// Do nothing
    #[strum(serialize = "nop")]
    Nop,
    /// Load argument onto the stack
    #[strum(serialize = "ldarg")]
    Ldarg,
    /// Load the address of an argument
    #[strum(serialize = "ldarga")]
    Ldarga,
    /// Store a value into an argument slot
    #[strum(serialize = "starg")]
    Starg,
    /// Load local variable onto the stack
    #[strum(serialize = "ldloc")]
    Ldloc,
    /// Load the address of a local variable
    #[strum(serialize = "ldloca")]
    Ldloca,
    /// Pop a value into a local variable
    #[strum(serialize = "stloc")]
    Stloc,
    /// Push an `int32` constant
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    /// Push an `int64` constant
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    /// Push a `float64` constant
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    /// Push a string literal
    #[strum(serialize = "ldstr")]
    Ldstr,
    /// Push a null reference
    #[strum(serialize = "ldnull")]
    Ldnull,
    /// Duplicate the top of the stack
    #[strum(serialize = "dup")]
    Dup,
    /// Discard the top of the stack
    #[strum(serialize = "pop")]
    Pop,
    /// Add two values
    #[strum(serialize = "add")]
    Add,
    /// Subtract two values
    #[strum(serialize = "sub")]
    Sub,
    /// Multiply two values
    #[strum(serialize = "mul")]
    Mul,
    /// Divide two values
    #[strum(serialize = "div")]
    Div,
    /// Remainder of a division
    #[strum(serialize = "rem")]
    Rem,
    /// Negate a value
    #[strum(serialize = "neg")]
    Neg,
    /// Bitwise and
    #[strum(serialize = "and")]
    And,
    /// Bitwise or
    #[strum(serialize = "or")]
    Or,
    /// Bitwise exclusive or
    #[strum(serialize = "xor")]
    Xor,
    /// Push 1 if the two values are equal, else 0
    #[strum(serialize = "ceq")]
    Ceq,
    /// Push 1 if the first value is greater than the second, else 0
    #[strum(serialize = "cgt")]
    Cgt,
    /// Push 1 if the first value is less than the second, else 0
    #[strum(serialize = "clt")]
    Clt,
    /// Unconditional branch
    #[strum(serialize = "br")]
    Br,
    /// Branch if the value is true, non-zero or non-null
    #[strum(serialize = "brtrue")]
    Brtrue,
    /// Branch if the value is false, zero or null
    #[strum(serialize = "brfalse")]
    Brfalse,
    /// Branch if equal
    #[strum(serialize = "beq")]
    Beq,
    /// Branch if not equal
    #[strum(serialize = "bne.un")]
    BneUn,
    /// Branch if less than
    #[strum(serialize = "blt")]
    Blt,
    /// Branch if greater than
    #[strum(serialize = "bgt")]
    Bgt,
    /// Branch if less than or equal
    #[strum(serialize = "ble")]
    Ble,
    /// Branch if greater than or equal
    #[strum(serialize = "bge")]
    Bge,
    /// Call a method
    #[strum(serialize = "call")]
    Call,
    /// Return from the method
    #[strum(serialize = "ret")]
    Ret,
    /// Throw the exception object on top of the stack
    #[strum(serialize = "throw")]
    Throw,
    /// Rethrow the exception currently being handled
    #[strum(serialize = "rethrow")]
    Rethrow,
    /// Exit a protected region
    #[strum(serialize = "leave")]
    Leave,
    /// End of a finally or fault block
    #[strum(serialize = "endfinally")]
    Endfinally,
    /// Load an instance field
    #[strum(serialize = "ldfld")]
    Ldfld,
    /// Store an instance field
    #[strum(serialize = "stfld")]
    Stfld,
    /// Load a value through a managed pointer
    #[strum(serialize = "ldind")]
    Ldind,
    /// Store a value through a managed pointer
    #[strum(serialize = "stind")]
    Stind,
}

impl OpCode {
    /// Returns the CIL mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Returns the kind of operand this opcode requires.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        match self {
            OpCode::Ldarg | OpCode::Ldarga | OpCode::Starg => OperandType::Argument,
            OpCode::Ldloc | OpCode::Ldloca | OpCode::Stloc => OperandType::Local,
            OpCode::LdcI4 => OperandType::Int32,
            OpCode::LdcI8 => OperandType::Int64,
            OpCode::LdcR8 => OperandType::Float64,
            OpCode::Ldstr => OperandType::String,
            OpCode::Br
            | OpCode::Brtrue
            | OpCode::Brfalse
            | OpCode::Beq
            | OpCode::BneUn
            | OpCode::Blt
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Bge
            | OpCode::Leave => OperandType::Label,
            OpCode::Call => OperandType::Method,
            OpCode::Ldfld | OpCode::Stfld => OperandType::Field,
            _ => OperandType::None,
        }
    }

    /// Returns how this opcode affects control flow.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            OpCode::Br => FlowType::UnconditionalBranch,
            OpCode::Brtrue
            | OpCode::Brfalse
            | OpCode::Beq
            | OpCode::BneUn
            | OpCode::Blt
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Bge => FlowType::ConditionalBranch,
            OpCode::Call => FlowType::Call,
            OpCode::Ret => FlowType::Return,
            OpCode::Throw | OpCode::Rethrow => FlowType::Throw,
            OpCode::Leave => FlowType::Leave,
            OpCode::Endfinally => FlowType::EndFinally,
            _ => FlowType::Sequential,
        }
    }

    /// Returns the fixed stack effect of this opcode.
    ///
    /// `call` and `ret` depend on the signature of the callee or the current method and return
    /// `None`.
    #[must_use]
    pub fn stack_behavior(self) -> Option<StackBehavior> {
        let (pops, pushes) = match self {
            OpCode::Call | OpCode::Ret => return None,
            OpCode::Nop
            | OpCode::Br
            | OpCode::Leave
            | OpCode::Endfinally
            | OpCode::Rethrow => (0, 0),
            OpCode::Ldarg
            | OpCode::Ldarga
            | OpCode::Ldloc
            | OpCode::Ldloca
            | OpCode::LdcI4
            | OpCode::LdcI8
            | OpCode::LdcR8
            | OpCode::Ldstr
            | OpCode::Ldnull => (0, 1),
            OpCode::Starg
            | OpCode::Stloc
            | OpCode::Pop
            | OpCode::Brtrue
            | OpCode::Brfalse
            | OpCode::Throw => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::Neg | OpCode::Ldfld | OpCode::Ldind => (1, 1),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Ceq
            | OpCode::Cgt
            | OpCode::Clt => (2, 1),
            OpCode::Beq
            | OpCode::BneUn
            | OpCode::Blt
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Bge
            | OpCode::Stfld
            | OpCode::Stind => (2, 0),
        };

        Some(StackBehavior::new(pops, pushes))
    }
}
