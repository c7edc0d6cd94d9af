use smol_str::SmolStr;
use thiserror::Error;

use crate::{range::Range, vm::MAX_SLOTS};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Undefined symbol `{name}`")]
    UndefinedSymbol { name: SmolStr, range: Option<Range> },
    #[error("`{name}` takes {expected} arguments but {found} were given")]
    Arity {
        name: SmolStr,
        expected: usize,
        found: usize,
        range: Option<Range>,
    },
    #[error("Nested lambdas need {count} argument slots, at most {max} are supported", max = MAX_SLOTS)]
    TooManySlots { count: usize, range: Option<Range> },
    #[error("Call has {count} arguments, at most {max} are supported", max = u16::MAX)]
    TooManyArguments { count: usize, range: Option<Range> },
}

impl CompileError {
    #[cold]
    pub fn range(&self) -> Option<Range> {
        match self {
            CompileError::UndefinedSymbol { range, .. }
            | CompileError::Arity { range, .. }
            | CompileError::TooManySlots { range, .. }
            | CompileError::TooManyArguments { range, .. } => *range,
        }
    }
}
