//! Turns a [`MethodBody`] into an executable form.
//!
//! Loading validates the body and resolves everything that refers to instruction ids (labels,
//! exception region boundaries) to positions, so the interpreter never searches by id.

use std::ops::Range;

use crate::{
    assembly::{ExceptionHandler, ExceptionHandlerFlags, InstrId, MethodBody, Operand},
    metadata::{method::MethodDescriptor, token::Token},
    Result,
};

/// An exception clause with its regions as instruction positions.
#[derive(Debug, Clone)]
pub(crate) struct LoadedHandler {
    pub(crate) clause: ExceptionHandler,
    pub(crate) try_range: Range<usize>,
    pub(crate) handler_range: Range<usize>,
}

/// A validated method body ready for execution.
#[derive(Debug, Clone)]
pub struct LoadedMethod {
    /// Token of the method
    pub token: Token,
    /// Metadata of the method
    pub descriptor: MethodDescriptor,
    /// The executed body
    pub body: MethodBody,
    pub(crate) targets: Vec<usize>,
    pub(crate) handlers: Vec<LoadedHandler>,
}

impl LoadedMethod {
    /// Position of the instruction `label` is bound to.
    pub(crate) fn target(&self, label: crate::assembly::Label) -> Option<usize> {
        self.targets.get(usize::try_from(label.0).ok()?).copied()
    }
}

fn position(body: &MethodBody, id: InstrId) -> Result<usize> {
    body.position(id)
        .ok_or_else(|| malformed_error!("Instruction {} does not exist", id))
}

/// Validates `body` against `descriptor` and resolves it for execution.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if:
/// - the body fails [`MethodBody::validate`]
/// - an instruction addresses an argument slot the method does not have
/// - an exception region is empty, inverted or uses filter clauses
pub fn load(token: Token, descriptor: &MethodDescriptor, body: MethodBody) -> Result<LoadedMethod> {
    body.validate()?;

    let slots = descriptor.slot_count();
    for (index, instr) in body.instructions.iter().enumerate() {
        if let Operand::Argument(slot) = instr.operand {
            if usize::from(slot) >= slots {
                return Err(malformed_error!(
                    "IL_{:04}: {} addresses argument {} but {} has {} slots",
                    index,
                    instr,
                    slot,
                    descriptor.full_name(),
                    slots
                ));
            }
        }
    }

    let mut targets = Vec::with_capacity(body.labels.len());
    for (index, target) in body.labels.iter().enumerate() {
        let id = target.ok_or_else(|| malformed_error!("Label L{} is never marked", index))?;
        targets.push(position(&body, id)?);
    }

    let mut handlers = Vec::with_capacity(body.exception_handlers.len());
    for clause in &body.exception_handlers {
        if clause.flags.contains(ExceptionHandlerFlags::FILTER) {
            return Err(malformed_error!(
                "Filter clauses are not supported ({})",
                descriptor.full_name()
            ));
        }

        let try_range = position(&body, clause.try_start)?..position(&body, clause.try_end)?;
        let handler_range =
            position(&body, clause.handler_start)?..position(&body, clause.handler_end)?;
        if try_range.is_empty() || handler_range.is_empty() {
            return Err(malformed_error!(
                "Empty or inverted exception region in {}",
                descriptor.full_name()
            ));
        }

        handlers.push(LoadedHandler {
            clause: clause.clone(),
            try_range,
            handler_range,
        });
    }

    Ok(LoadedMethod {
        token,
        descriptor: descriptor.clone(),
        body,
        targets,
        handlers,
    })
}
