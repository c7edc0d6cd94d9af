use thiserror::Error;

use crate::lexer::token::Token;

use super::parser::MAX_NESTING_DEPTH;

/// The first grammar error found. The trailing `String` is the input that
/// remained unconsumed from the offending token on.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum ParseError {
    #[error("Unexpected token `{0}` at `{1}`")]
    UnexpectedToken(Token, String),
    #[error("Unexpected EOF detected")]
    UnexpectedEof(Token),
    #[error("Expected a closing parenthesis `)` but got `{0}` at `{1}`")]
    ExpectedClosingParen(Token, String),
    #[error("Expected a closing brace `}}` but got `{0}` at `{1}`")]
    ExpectedClosingBrace(Token, String),
    #[error("Expected a closing bracket `]` but got `{0}` at `{1}`")]
    ExpectedClosingBracket(Token, String),
    #[error("Expression nests more than {max} levels deep at `{1}`", max = MAX_NESTING_DEPTH)]
    TooDeep(Token, String),
}

impl ParseError {
    #[cold]
    pub fn token(&self) -> &Token {
        match self {
            ParseError::UnexpectedToken(token, _)
            | ParseError::UnexpectedEof(token)
            | ParseError::ExpectedClosingParen(token, _)
            | ParseError::ExpectedClosingBrace(token, _)
            | ParseError::ExpectedClosingBracket(token, _)
            | ParseError::TooDeep(token, _) => token,
        }
    }

    #[cold]
    pub fn remaining(&self) -> &str {
        match self {
            ParseError::UnexpectedToken(_, rest)
            | ParseError::ExpectedClosingParen(_, rest)
            | ParseError::ExpectedClosingBrace(_, rest)
            | ParseError::ExpectedClosingBracket(_, rest)
            | ParseError::TooDeep(_, rest) => rest,
            ParseError::UnexpectedEof(_) => "",
        }
    }
}
