use smol_str::SmolStr;
use thiserror::Error;

use crate::convert::ConversionError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("`{name}` takes {expected} arguments but {found} were given")]
    Arity {
        name: SmolStr,
        expected: usize,
        found: usize,
    },
    #[error("Invalid argument {argument} to `{function}`: {source}")]
    Conversion {
        function: SmolStr,
        argument: usize,
        source: ConversionError,
    },
    #[error("Invalid result from `{function}`: {source}")]
    InvalidResult {
        function: SmolStr,
        source: ConversionError,
    },
    #[error("`{function}` failed: {message}")]
    Host { function: SmolStr, message: String },
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Recursion limit of {0} nested calls exceeded")]
    RecursionLimit(usize),
    #[error("A value of kind `{0}` is not callable")]
    NotCallable(&'static str),
    #[error("Slot {0} is not bound")]
    UnboundSlot(u16),
    #[error("Operand stack underflow")]
    StackUnderflow,
    #[error("Program counter {0} is out of range")]
    InvalidProgramCounter(usize),
}

impl RuntimeError {
    pub fn host(function: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        RuntimeError::Host {
            function: function.into(),
            message: message.into(),
        }
    }
}
