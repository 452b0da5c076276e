//! Instruction representation, operand types and flow metadata.
//!
//! # Key Components
//!
//! - [`Instruction`] - One instruction of a method body, identified by a stable [`InstrId`]
//! - [`Operand`] - Type-safe operand representation
//! - [`Immediate`] - Constant operands embedded in the instruction
//! - [`Label`] - Symbolic branch target, resolved through the owning body's label table
//! - [`FlowType`] - Control flow behavior classification
//! - [`StackBehavior`] - Fixed stack effect of an opcode
//!
//! # Identity vs. Position
//!
//! Instructions are addressed by [`InstrId`], never by their index in the body. Ids are handed
//! out by the owning [`crate::assembly::MethodBody`] and survive any number of insertions, so
//! labels and exception regions that refer to an instruction keep pointing at it while code is
//! spliced around it.
//!
//! # Usage Examples
//!
//! ```rust
//! use dotpatch::assembly::{Immediate, InstrId, Instruction, OpCode, Operand};
//!
//! let push = Instruction::new(InstrId(0), OpCode::LdcI4, Operand::Immediate(Immediate::Int32(42)))?;
//! assert_eq!(push.to_string(), "ldc.i4 42");
//!
//! // Operand kinds are checked at construction
//! assert!(Instruction::new(InstrId(1), OpCode::Ldarg, Operand::None).is_err());
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::fmt;

use crate::{assembly::opcodes::OpCode, metadata::token::Token, Result};

/// Kinds of operands an opcode can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 64-bit floating point
    Float64,
    /// Argument slot index
    Argument,
    /// Local variable index
    Local,
    /// Branch target
    Label,
    /// Callee token
    Method,
    /// Instance field name
    Field,
    /// String literal
    String,
}

/// An immediate value embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int32(value) => write!(f, "{value}"),
            Immediate::Int64(value) => write!(f, "{value}"),
            Immediate::Float64(value) => write!(f, "{value:?}"),
        }
    }
}

/// Stable identity of an instruction within one [`crate::assembly::MethodBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A symbolic branch target.
///
/// A label is an index into the owning body's label table. It is created unmarked by
/// [`crate::assembly::MethodBody::define_label`] and later bound to an instruction with
/// [`crate::assembly::MethodBody::mark_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// The operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// Method argument slot
    Argument(u16),
    /// Local variable index
    Local(u16),
    /// Branch target
    Label(Label),
    /// Method to call
    Method(Token),
    /// Instance field name
    Field(String),
    /// String literal
    String(String),
}

impl Operand {
    /// Returns the kind of this operand.
    #[must_use]
    pub fn operand_type(&self) -> OperandType {
        match self {
            Operand::None => OperandType::None,
            Operand::Immediate(Immediate::Int32(_)) => OperandType::Int32,
            Operand::Immediate(Immediate::Int64(_)) => OperandType::Int64,
            Operand::Immediate(Immediate::Float64(_)) => OperandType::Float64,
            Operand::Argument(_) => OperandType::Argument,
            Operand::Local(_) => OperandType::Local,
            Operand::Label(_) => OperandType::Label,
            Operand::Method(_) => OperandType::Method,
            Operand::Field(_) => OperandType::Field,
            Operand::String(_) => OperandType::String,
        }
    }

    /// Returns a formatted string representation of the operand.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dotpatch::assembly::{Label, Operand};
    ///
    /// assert_eq!(Operand::None.as_string(), None);
    /// assert_eq!(Operand::Local(5).as_string(), Some("V_5".to_string()));
    /// assert_eq!(Operand::Argument(3).as_string(), Some("A_3".to_string()));
    /// assert_eq!(Operand::Label(Label(2)).as_string(), Some("L2".to_string()));
    /// ```
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Operand::None => None,
            Operand::Immediate(imm) => Some(imm.to_string()),
            Operand::Argument(a) => Some(format!("A_{a}")),
            Operand::Local(l) => Some(format!("V_{l}")),
            Operand::Label(label) => Some(label.to_string()),
            Operand::Method(token) => Some(token.to_string()),
            Operand::Field(name) => Some(name.clone()),
            Operand::String(s) => Some(format!("{s:?}")),
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

/// How an instruction affects the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

impl StackBehavior {
    /// Creates a stack behavior and derives its net effect.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn new(pops: u8, pushes: u8) -> Self {
        StackBehavior {
            pops,
            pushes,
            net_effect: pushes as i8 - pops as i8,
        }
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Stable identity within the owning body
    pub id: InstrId,
    /// The operation
    pub opcode: OpCode,
    /// The operand, always of the kind [`OpCode::operand_type`] demands
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction, checking that the operand kind matches the opcode.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `operand` is not of the kind `opcode` requires.
    pub fn new(id: InstrId, opcode: OpCode, operand: Operand) -> Result<Self> {
        let expected = opcode.operand_type();
        let actual = operand.operand_type();
        if expected != actual {
            return Err(malformed_error!(
                "{} expects a {:?} operand, got {:?}",
                opcode,
                expected,
                actual
            ));
        }

        Ok(Instruction {
            id,
            opcode,
            operand,
        })
    }

    /// Returns the CIL mnemonic of the opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    /// Returns how this instruction affects control flow.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Check if this instruction is a branch instruction (including `leave`).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        )
    }

    /// Check if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::Leave
                | FlowType::EndFinally
        )
    }

    /// Returns the branch target, if this is a branch.
    #[must_use]
    pub fn label(&self) -> Option<Label> {
        match self.operand {
            Operand::Label(label) => Some(label),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand.as_string() {
            Some(operand) => write!(f, "{} {}", self.mnemonic(), operand),
            None => write!(f, "{}", self.mnemonic()),
        }
    }
}
