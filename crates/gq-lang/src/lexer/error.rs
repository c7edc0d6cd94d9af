use thiserror::Error;

use crate::range::Range;

/// The first malformed token found in the input. The second field is the
/// unconsumed input starting at the failure.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum LexerError {
    #[error("Unterminated string at `{1}`")]
    UnterminatedString(Range, String),
    #[error("Two decimal points in number at `{1}`")]
    TwoDecimalPoints(Range, String),
    #[error("Unexpected `-` at `{1}`")]
    UnexpectedMinus(Range, String),
    #[error("Invalid number at `{1}`")]
    InvalidNumber(Range, String),
    #[error("Invalid feature id at `{1}`")]
    InvalidFeatureId(Range, String),
    #[error("Unexpected character at `{1}`")]
    UnexpectedCharacter(Range, String),
}

impl LexerError {
    #[cold]
    pub fn range(&self) -> Range {
        match self {
            LexerError::UnterminatedString(range, _)
            | LexerError::TwoDecimalPoints(range, _)
            | LexerError::UnexpectedMinus(range, _)
            | LexerError::InvalidNumber(range, _)
            | LexerError::InvalidFeatureId(range, _)
            | LexerError::UnexpectedCharacter(range, _) => *range,
        }
    }

    #[cold]
    pub fn remaining(&self) -> &str {
        match self {
            LexerError::UnterminatedString(_, rest)
            | LexerError::TwoDecimalPoints(_, rest)
            | LexerError::UnexpectedMinus(_, rest)
            | LexerError::InvalidNumber(_, rest)
            | LexerError::InvalidFeatureId(_, rest)
            | LexerError::UnexpectedCharacter(_, rest) => rest,
        }
    }
}
