//! Exception handling regions.
//!
//! Region boundaries are expressed as [`InstrId`]s, so they stay attached to the same
//! instructions while the body is rewritten. Both `try_end` and `handler_end` are exclusive:
//! they name the first instruction *after* the region.
//!
//! # Layout
//!
//! ```text
//! try_start    ─┐
//!               │ protected code
//! handler_start ┘─┐
//!                 │ handler code
//! handler_end    ─┘ (try_end == handler_start for the usual adjacent layout)
//! ```

use bitflags::bitflags;

use crate::assembly::instruction::InstrId;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// The handler's `catch_type` names the exception type it catches; `None` catches
        /// everything.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        const FILTER = 0x0001;

        /// A finally clause.
        ///
        /// Runs when control leaves the protected region, normally or by exception.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// One exception handling clause of a method body.
///
/// Handlers of a body are ordered innermost first, so the first handler whose protected region
/// covers a faulting instruction is the one that gets to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Kind of clause (catch, filter, finally, fault)
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction
    pub try_start: InstrId,
    /// First instruction after the protected region
    pub try_end: InstrId,
    /// First handler instruction
    pub handler_start: InstrId,
    /// First instruction after the handler
    pub handler_end: InstrId,
    /// For catch clauses, the caught exception type; `None` catches everything
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    /// Creates a catch clause.
    #[must_use]
    pub fn catch(
        try_start: InstrId,
        try_end: InstrId,
        handler_start: InstrId,
        handler_end: InstrId,
        catch_type: Option<&str>,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end,
            handler_start,
            handler_end,
            catch_type: catch_type.map(str::to_string),
        }
    }

    /// Returns `true` for typed or catch-all clauses.
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags.is_empty()
    }

    /// Returns `true` for finally clauses.
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// Returns `true` for fault clauses.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FAULT)
    }

    /// Returns `true` if this clause catches exceptions of `type_name`.
    ///
    /// `System.Exception` and a missing catch type catch every exception.
    #[must_use]
    pub fn catches(&self, type_name: &str) -> bool {
        if !self.is_catch() {
            return false;
        }

        match self.catch_type.as_deref() {
            None | Some("System.Exception") => true,
            Some(caught) => caught == type_name,
        }
    }

    /// Returns mutable references to all four region boundaries.
    pub fn boundaries_mut(&mut self) -> [&mut InstrId; 4] {
        [
            &mut self.try_start,
            &mut self.try_end,
            &mut self.handler_start,
            &mut self.handler_end,
        ]
    }
}
