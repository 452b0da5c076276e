//! Mutable method bodies.
//!
//! A [`MethodBody`] is the unit the rewriting engine operates on: an ordered list of
//! [`Instruction`]s together with the method's local variables, a label table and the
//! exception handling regions. Everything that refers to code (labels, region boundaries)
//! refers to an [`InstrId`], so inserting instructions never invalidates existing references.
//!
//! # Retargeting
//!
//! Inserting code *in front of* an instruction does not redirect jumps that target it; the
//! inserted code is only reached by falling into it. To make incoming control flow pass
//! through new code, move the references explicitly with [`MethodBody::retarget`].
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::assembly::{MethodBody, OpCode, Operand};
//!
//! let mut body = MethodBody::new();
//! let ret = body.push(OpCode::Ret, Operand::None)?;
//! let nop = body.insert(0, OpCode::Nop, Operand::None)?;
//!
//! assert_eq!(body.position(ret), Some(1));
//! assert_eq!(body.position(nop), Some(0));
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    assembly::{
        exceptions::ExceptionHandler,
        instruction::{InstrId, Instruction, Label, Operand},
        opcodes::OpCode,
    },
    metadata::method::TypeSig,
    Result,
};

/// A local variable slot of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    /// Diagnostic name, empty for anonymous locals
    pub name: String,
    /// Declared type, used for default initialization
    pub ty: TypeSig,
}

/// The instruction sequence of a method together with its locals, labels and exception
/// handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    /// Instructions in execution order
    pub instructions: Vec<Instruction>,
    /// Local variable slots, indexed by `ldloc`/`stloc` operands
    pub locals: Vec<LocalVariable>,
    /// Label table, `None` for labels that are defined but not yet marked
    pub labels: Vec<Option<InstrId>>,
    /// Exception handling clauses, innermost first
    pub exception_handlers: Vec<ExceptionHandler>,
    next_id: u32,
}

impl MethodBody {
    /// Creates an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if the body contains no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Appends a local variable and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the local table is full.
    pub fn add_local(&mut self, name: &str, ty: TypeSig) -> Result<u16> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| malformed_error!("too many locals in method body"))?;
        self.locals.push(LocalVariable {
            name: name.to_string(),
            ty,
        });
        Ok(index)
    }

    /// Defines a new, unmarked label.
    pub fn define_label(&mut self) -> Label {
        // Label counts are bounded by instruction counts, which are far below u32::MAX
        #[allow(clippy::cast_possible_truncation)]
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Binds `label` to the instruction `target`.
    ///
    /// A label may be re-marked; the latest target wins.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the label or the instruction is unknown.
    pub fn mark_label(&mut self, label: Label, target: InstrId) -> Result<()> {
        if self.position(target).is_none() {
            return Err(malformed_error!(
                "cannot mark {} at unknown instruction {}",
                label,
                target
            ));
        }

        match self.labels.get_mut(label.0 as usize) {
            Some(slot) => {
                *slot = Some(target);
                Ok(())
            }
            None => Err(malformed_error!("unknown label {}", label)),
        }
    }

    /// Returns the instruction a label is bound to.
    #[must_use]
    pub fn label_target(&self, label: Label) -> Option<InstrId> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Returns the current index of the instruction with the given id.
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|instr| instr.id == id)
    }

    /// Returns the instruction with the given id.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.iter().find(|instr| instr.id == id)
    }

    /// Inserts a new instruction at `index`, shifting later instructions back.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `index` is past the end or the operand does not
    /// fit the opcode.
    pub fn insert(&mut self, index: usize, opcode: OpCode, operand: Operand) -> Result<InstrId> {
        if index > self.instructions.len() {
            return Err(malformed_error!(
                "insert position {} is past the end of a body with {} instructions",
                index,
                self.instructions.len()
            ));
        }

        let instruction = Instruction::new(InstrId(self.next_id), opcode, operand)?;
        let id = instruction.id;
        self.next_id += 1;
        self.instructions.insert(index, instruction);
        Ok(id)
    }

    /// Appends a new instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the operand does not fit the opcode.
    pub fn push(&mut self, opcode: OpCode, operand: Operand) -> Result<InstrId> {
        self.insert(self.instructions.len(), opcode, operand)
    }

    /// Redirects every label and exception region boundary that refers to `from` so it refers
    /// to `to` instead. Returns the number of references moved.
    pub fn retarget(&mut self, from: InstrId, to: InstrId) -> usize {
        let mut moved = 0;
        for target in self.labels.iter_mut().flatten() {
            if *target == from {
                *target = to;
                moved += 1;
            }
        }

        for handler in &mut self.exception_handlers {
            for boundary in handler.boundaries_mut() {
                if *boundary == from {
                    *boundary = to;
                    moved += 1;
                }
            }
        }

        moved
    }

    /// Rewrites the body so it has a single return point, placed after every other instruction.
    ///
    /// Every `ret` except the exit becomes a `br` to it. The exit is the last `ret` when it is
    /// also the last instruction; when code follows it (a throw block after the final return,
    /// say), a fresh `ret` is appended and all existing ones branch there. Rewritten
    /// instructions keep their ids, so branches into them stay valid. Returns the id of the
    /// exit.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the body contains no `ret`.
    pub fn normalize_returns(&mut self) -> Result<InstrId> {
        let returns: Vec<usize> = self
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, instr)| instr.opcode == OpCode::Ret)
            .map(|(index, _)| index)
            .collect();

        let Some((&last, others)) = returns.split_last() else {
            return Err(malformed_error!("method body has no ret instruction"));
        };

        let (exit, redirected) = if last + 1 == self.instructions.len() {
            (self.instructions[last].id, others)
        } else {
            (self.push(OpCode::Ret, Operand::None)?, returns.as_slice())
        };

        if !redirected.is_empty() {
            let label = self.define_label();
            self.mark_label(label, exit)?;
            for &index in redirected {
                let instr = &mut self.instructions[index];
                instr.opcode = OpCode::Br;
                instr.operand = Operand::Label(label);
            }
        }

        Ok(exit)
    }

    /// Checks the structural well-formedness of the body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if:
    /// - the body is empty, or control can fall off its end
    /// - a branch uses an unknown or unmarked label, or a label points at a missing instruction
    /// - a local operand is out of range
    /// - an exception region boundary is missing or a region is empty
    pub fn validate(&self) -> Result<()> {
        let Some(last) = self.instructions.last() else {
            return Err(malformed_error!("method body is empty"));
        };
        if !last.is_terminal() {
            return Err(malformed_error!(
                "control falls off the end of the body after {}",
                last
            ));
        }

        for instr in &self.instructions {
            match &instr.operand {
                Operand::Label(label) => {
                    let target = self.label_target(*label).ok_or_else(|| {
                        malformed_error!("{} at {} uses unmarked label {}", instr, instr.id, label)
                    })?;
                    if self.position(target).is_none() {
                        return Err(malformed_error!(
                            "{} points at missing instruction {}",
                            label,
                            target
                        ));
                    }
                }
                Operand::Local(index) if usize::from(*index) >= self.locals.len() => {
                    return Err(malformed_error!(
                        "{} at {} uses local {} of {}",
                        instr,
                        instr.id,
                        index,
                        self.locals.len()
                    ));
                }
                _ => {}
            }
        }

        for handler in &self.exception_handlers {
            let resolve = |id: InstrId| {
                self.position(id)
                    .ok_or_else(|| malformed_error!("exception region refers to missing {}", id))
            };
            let try_start = resolve(handler.try_start)?;
            let try_end = resolve(handler.try_end)?;
            let handler_start = resolve(handler.handler_start)?;
            let handler_end = resolve(handler.handler_end)?;

            if try_start >= try_end || handler_start >= handler_end {
                return Err(malformed_error!(
                    "empty exception region {}..{} / {}..{}",
                    try_start,
                    try_end,
                    handler_start,
                    handler_end
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{exceptions::ExceptionHandler, instruction::Immediate};

    fn ldc(value: i32) -> Operand {
        Operand::Immediate(Immediate::Int32(value))
    }

    #[test]
    fn test_ids_survive_insertion() {
        let mut body = MethodBody::new();
        let first = body.push(OpCode::LdcI4, ldc(1)).unwrap();
        let ret = body.push(OpCode::Ret, Operand::None).unwrap();
        let inserted = body.insert(1, OpCode::Nop, Operand::None).unwrap();

        assert_ne!(inserted, first);
        assert_ne!(inserted, ret);
        assert_eq!(body.position(first), Some(0));
        assert_eq!(body.position(inserted), Some(1));
        assert_eq!(body.position(ret), Some(2));
        assert!(body.insert(10, OpCode::Nop, Operand::None).is_err());
    }

    #[test]
    fn test_labels_follow_instructions() {
        let mut body = MethodBody::new();
        let ret = body.push(OpCode::Ret, Operand::None).unwrap();
        let label = body.define_label();
        assert_eq!(body.label_target(label), None);

        body.mark_label(label, ret).unwrap();
        body.insert(0, OpCode::Br, Operand::Label(label)).unwrap();
        assert_eq!(body.label_target(label), Some(ret));
        assert!(body.validate().is_ok());

        assert!(body.mark_label(Label(7), ret).is_err());
        assert!(body.mark_label(label, InstrId(99)).is_err());
    }

    #[test]
    fn test_retarget_moves_labels_and_regions() {
        let mut body = MethodBody::new();
        let a = body.push(OpCode::Nop, Operand::None).unwrap();
        let b = body.push(OpCode::Nop, Operand::None).unwrap();
        let c = body.push(OpCode::Ret, Operand::None).unwrap();
        let label = body.define_label();
        body.mark_label(label, c).unwrap();
        body.exception_handlers
            .push(ExceptionHandler::catch(a, b, b, c, None));

        let epilogue = body.insert(2, OpCode::Nop, Operand::None).unwrap();
        let moved = body.retarget(c, epilogue);

        assert_eq!(moved, 2);
        assert_eq!(body.label_target(label), Some(epilogue));
        assert_eq!(body.exception_handlers[0].handler_end, epilogue);
        assert_eq!(body.exception_handlers[0].try_end, b);
    }

    #[test]
    fn test_normalize_returns() {
        let mut body = MethodBody::new();
        let skip = body.define_label();
        body.push(OpCode::Ldarg, Operand::Argument(0)).unwrap();
        body.push(OpCode::Brtrue, Operand::Label(skip)).unwrap();
        body.push(OpCode::LdcI4, ldc(1)).unwrap();
        let early = body.push(OpCode::Ret, Operand::None).unwrap();
        let target = body.push(OpCode::LdcI4, ldc(2)).unwrap();
        body.mark_label(skip, target).unwrap();
        let last = body.push(OpCode::Ret, Operand::None).unwrap();

        let exit = body.normalize_returns().unwrap();
        assert_eq!(exit, last);

        let rewritten = body.instruction(early).unwrap();
        assert_eq!(rewritten.opcode, OpCode::Br);
        let label = rewritten.label().unwrap();
        assert_eq!(body.label_target(label), Some(last));
        assert_eq!(
            body.instructions
                .iter()
                .filter(|i| i.opcode == OpCode::Ret)
                .count(),
            1
        );
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_normalize_appends_exit_after_trailing_block() {
        let mut body = MethodBody::new();
        let fail = body.define_label();
        body.push(OpCode::Ldarg, Operand::Argument(0)).unwrap();
        body.push(OpCode::Brfalse, Operand::Label(fail)).unwrap();
        body.push(OpCode::Ldarg, Operand::Argument(0)).unwrap();
        let early = body.push(OpCode::Ret, Operand::None).unwrap();
        let thrower = body.push(OpCode::Ldnull, Operand::None).unwrap();
        body.mark_label(fail, thrower).unwrap();
        body.push(OpCode::Throw, Operand::None).unwrap();

        let exit = body.normalize_returns().unwrap();

        assert_eq!(body.instructions.last().unwrap().id, exit);
        assert_eq!(body.instructions.last().unwrap().opcode, OpCode::Ret);
        let rewritten = body.instruction(early).unwrap();
        assert_eq!(rewritten.opcode, OpCode::Br);
        assert_eq!(body.label_target(rewritten.label().unwrap()), Some(exit));
        assert_eq!(body.label_target(fail), Some(thrower));
        assert_eq!(
            body.instructions
                .iter()
                .filter(|i| i.opcode == OpCode::Ret)
                .count(),
            1
        );
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_normalize_requires_ret() {
        let mut body = MethodBody::new();
        body.push(OpCode::Ldnull, Operand::None).unwrap();
        body.push(OpCode::Throw, Operand::None).unwrap();
        assert!(body.normalize_returns().is_err());
    }

    #[test]
    fn test_validate_rejects() {
        let mut empty = MethodBody::new();
        assert!(empty.validate().is_err());

        empty.push(OpCode::Nop, Operand::None).unwrap();
        assert!(empty.validate().is_err(), "falls off the end");

        let mut unmarked = MethodBody::new();
        let label = unmarked.define_label();
        unmarked.push(OpCode::Br, Operand::Label(label)).unwrap();
        assert!(unmarked.validate().is_err());

        let mut bad_local = MethodBody::new();
        bad_local.push(OpCode::Ldloc, Operand::Local(0)).unwrap();
        bad_local.push(OpCode::Ret, Operand::None).unwrap();
        assert!(bad_local.validate().is_err());
        bad_local.add_local("x", TypeSig::I32).unwrap();
        assert!(bad_local.validate().is_ok());
    }
}
