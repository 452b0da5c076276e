use thiserror::Error;

use crate::{
    emulation::EmulationError,
    metadata::token::Token,
    patch::{BindingError, DetourId},
};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into three groups:
///
/// ## Configuration Errors
/// - [`Error::Binding`] - A hook cannot be bound against the target method. These are raised
///   synchronously by [`crate::patch::Patcher::patch`] before anything is installed.
///
/// ## Instruction Sequence Errors
/// - [`Error::Malformed`] - A method body is structurally invalid (unmarked label, missing
///   `ret`, broken exception region, wrong operand kind)
/// - [`Error::MethodNotFound`] - A method token is unknown to the host
/// - [`Error::DetourNotFound`] - A patch layer is not installed on the given method
///
/// ## Execution Errors
/// - [`Error::Emulation`] - The reference runtime failed while executing a method. Managed
///   exceptions thrown by IL code or hooks are *not* errors; they are reported as
///   [`crate::emulation::CallOutcome::Throw`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::{Error, patch::{HookSet, Patcher}, emulation::Runtime, metadata::token::Token};
///
/// let mut patcher = Patcher::new(Runtime::new());
/// match patcher.patch(Token::new(0x0600_0001), HookSet::new()) {
///     Ok(handle) => println!("installed {handle}"),
///     Err(Error::Binding(err)) => eprintln!("hook does not fit: {err}"),
///     Err(Error::MethodNotFound(token)) => eprintln!("no method {token}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A method body is damaged and could not be processed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A hook could not be bound against the method it was registered for.
    #[error("{0}")]
    Binding(#[from] BindingError),

    /// The host does not know a method with this token.
    #[error("Method not found - {0}")]
    MethodNotFound(Token),

    /// The given patch layer is not installed on the method.
    #[error("Detour {detour} is not installed on method {method}")]
    DetourNotFound {
        /// Method the detour was expected on
        method: Token,
        /// Identifier of the missing detour
        detour: DetourId,
    },

    /// The reference runtime failed to execute a method.
    #[error("{0}")]
    Emulation(#[from] EmulationError),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
