//! An insertion cursor over a method body.
//!
//! [`IlCursor`] exclusively borrows a [`MethodBody`] and tracks an insertion index. Emitting
//! inserts *before* the instruction at the cursor and advances past the new instruction, so a
//! run of `emit` calls produces code in the order it was written, in front of whatever the
//! cursor was positioned at.
//!
//! ```text
//! before:   ldarg A_1   add   ret
//!                             ^ cursor (index 2)
//! emit(dup); emit(pop):
//! after:    ldarg A_1   add   dup   pop   ret
//!                                         ^ cursor (index 4)
//! ```
//!
//! Labels marked through the cursor float: they bind to the next instruction emitted at the
//! cursor, or to the instruction at the cursor once the cursor moves or [`IlCursor::settle`] is
//! called. This makes "the code that follows" a valid branch target while it is still being
//! written.
//!
//! The cursor never retargets branches on its own; see [`MethodBody::retarget`].

use crate::{
    assembly::{
        body::MethodBody,
        instruction::{Immediate, InstrId, Instruction, Label, Operand},
        opcodes::OpCode,
    },
    metadata::{method::TypeSig, token::Token},
    Result,
};

/// Insertion cursor over an exclusively borrowed [`MethodBody`].
pub struct IlCursor<'a> {
    body: &'a mut MethodBody,
    index: usize,
    pending: Vec<Label>,
}

impl<'a> IlCursor<'a> {
    /// Creates a cursor positioned at the start of `body`.
    pub fn new(body: &'a mut MethodBody) -> Self {
        IlCursor {
            body,
            index: 0,
            pending: Vec::new(),
        }
    }

    /// Current insertion index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The instruction the cursor is positioned at, `None` at the end of the body.
    #[must_use]
    pub fn current(&self) -> Option<&Instruction> {
        self.body.instructions.get(self.index)
    }

    /// Shared access to the underlying body.
    #[must_use]
    pub fn body(&self) -> &MethodBody {
        self.body
    }

    /// Exclusive access to the underlying body.
    pub fn body_mut(&mut self) -> &mut MethodBody {
        self.body
    }

    /// Moves the cursor to `index`; `index == len` positions it at the end.
    ///
    /// Floating labels are settled at the old position first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `index` is past the end, or floating labels
    /// cannot be settled.
    pub fn goto(&mut self, index: usize) -> Result<()> {
        self.settle()?;
        if index > self.body.len() {
            return Err(malformed_error!(
                "cursor position {} is past the end of a body with {} instructions",
                index,
                self.body.len()
            ));
        }
        self.index = index;
        Ok(())
    }

    /// Moves the cursor in front of the instruction `id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if no such instruction exists, or floating labels
    /// cannot be settled.
    pub fn goto_id(&mut self, id: InstrId) -> Result<()> {
        self.settle()?;
        self.index = self
            .body
            .position(id)
            .ok_or_else(|| malformed_error!("cursor target {} is not in the body", id))?;
        Ok(())
    }

    /// Inserts an instruction at the cursor and advances past it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the operand does not fit the opcode.
    pub fn emit(&mut self, opcode: OpCode, operand: Operand) -> Result<InstrId> {
        let id = self.body.insert(self.index, opcode, operand)?;
        self.index += 1;
        for label in self.pending.drain(..) {
            self.body.mark_label(label, id)?;
        }
        Ok(id)
    }

    /// Emits an instruction without operand.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the opcode requires an operand.
    pub fn emit_op(&mut self, opcode: OpCode) -> Result<InstrId> {
        self.emit(opcode, Operand::None)
    }

    /// Emits `ldarg`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_ldarg(&mut self, slot: u16) -> Result<InstrId> {
        self.emit(OpCode::Ldarg, Operand::Argument(slot))
    }

    /// Emits `ldarga`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_ldarga(&mut self, slot: u16) -> Result<InstrId> {
        self.emit(OpCode::Ldarga, Operand::Argument(slot))
    }

    /// Emits `ldloc`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_ldloc(&mut self, local: u16) -> Result<InstrId> {
        self.emit(OpCode::Ldloc, Operand::Local(local))
    }

    /// Emits `ldloca`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_ldloca(&mut self, local: u16) -> Result<InstrId> {
        self.emit(OpCode::Ldloca, Operand::Local(local))
    }

    /// Emits `stloc`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_stloc(&mut self, local: u16) -> Result<InstrId> {
        self.emit(OpCode::Stloc, Operand::Local(local))
    }

    /// Emits `ldc.i4`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<InstrId> {
        self.emit(OpCode::LdcI4, Operand::Immediate(Immediate::Int32(value)))
    }

    /// Emits `call`.
    ///
    /// # Errors
    ///
    /// See [`IlCursor::emit`].
    pub fn emit_call(&mut self, method: Token) -> Result<InstrId> {
        self.emit(OpCode::Call, Operand::Method(method))
    }

    /// Emits a branch (`br`, `brfalse`, `leave`, ...) to `label`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `opcode` does not take a label.
    pub fn emit_branch(&mut self, opcode: OpCode, label: Label) -> Result<InstrId> {
        self.emit(opcode, Operand::Label(label))
    }

    /// Defines a new, unmarked label in the body.
    pub fn define_label(&mut self) -> Label {
        self.body.define_label()
    }

    /// Marks `label` at the cursor position.
    ///
    /// The label binds to the next instruction emitted here, or to the instruction at the cursor
    /// when the cursor moves or settles first.
    pub fn mark_label(&mut self, label: Label) {
        self.pending.push(label);
    }

    /// Binds floating labels to the instruction at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if labels are floating and the cursor is at the end
    /// of the body.
    pub fn settle(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let target = self.current().map(|instr| instr.id).ok_or_else(|| {
            malformed_error!("cannot mark {} labels at the end of the body", self.pending.len())
        })?;
        for label in self.pending.drain(..) {
            self.body.mark_label(label, target)?;
        }
        Ok(())
    }

    /// Appends a local variable to the body.
    ///
    /// # Errors
    ///
    /// See [`MethodBody::add_local`].
    pub fn add_local(&mut self, name: &str, ty: TypeSig) -> Result<u16> {
        self.body.add_local(name, ty)
    }
}
