use miette::{Diagnostic, SourceSpan};

use crate::{
    ast::error::ParseError,
    compiler::CompileError,
    lexer::error::LexerError,
    range::Range,
    registry::RegistryError,
    vm::error::RuntimeError,
    world::ApplyChangeError,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InnerError {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Apply(#[from] ApplyChangeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Represents a high-level error with diagnostic information for the user.
#[derive(PartialEq, Debug, thiserror::Error)]
#[error("{cause}")]
pub struct Error {
    /// The underlying cause of the error.
    pub cause: InnerError,
    /// The expression text the error refers to.
    pub source_code: String,
    /// The location in the source code for diagnostics.
    pub location: SourceSpan,
}

impl Error {
    /// Wraps `cause`, locating it from the ranges lexer, parser and compiler
    /// errors carry. Other errors, and ranges outside `source_code`, point at
    /// the start of the input.
    pub fn from_error(source_code: impl Into<String>, cause: InnerError) -> Self {
        let source_code = source_code.into();
        let range = match &cause {
            InnerError::Lexer(err) => Some(err.range()),
            InnerError::Parse(ParseError::UnexpectedEof(_)) => {
                let end = source_code.len();
                Some(Range::new(end, end))
            }
            InnerError::Parse(err) => Some(err.token().range),
            InnerError::Compile(err) => err.range(),
            InnerError::Runtime(_) | InnerError::Apply(_) | InnerError::Registry(_) => None,
        };

        let range = range.filter(|range| range.end <= source_code.len());

        Self {
            location: span(range.unwrap_or_default()),
            cause,
            source_code,
        }
    }

    pub fn with_range(mut self, range: Option<Range>) -> Self {
        if let Some(range) = range.filter(|range| range.end <= self.source_code.len()) {
            self.location = span(range);
        }
        self
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.cause, InnerError::Runtime(RuntimeError::DeadlineExceeded))
    }
}

fn span(range: Range) -> SourceSpan {
    SourceSpan::new(range.start.into(), std::cmp::max(range.len(), 1))
}

impl Diagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let c = match &self.cause {
            InnerError::Lexer(LexerError::UnterminatedString(..)) => "LexerError::UnterminatedString",
            InnerError::Lexer(LexerError::TwoDecimalPoints(..)) => "LexerError::TwoDecimalPoints",
            InnerError::Lexer(LexerError::UnexpectedMinus(..)) => "LexerError::UnexpectedMinus",
            InnerError::Lexer(LexerError::InvalidNumber(..)) => "LexerError::InvalidNumber",
            InnerError::Lexer(LexerError::InvalidFeatureId(..)) => "LexerError::InvalidFeatureId",
            InnerError::Lexer(LexerError::UnexpectedCharacter(..)) => {
                "LexerError::UnexpectedCharacter"
            }
            InnerError::Parse(ParseError::UnexpectedToken(..)) => "ParseError::UnexpectedToken",
            InnerError::Parse(ParseError::UnexpectedEof(_)) => "ParseError::UnexpectedEof",
            InnerError::Parse(ParseError::ExpectedClosingParen(..)) => {
                "ParseError::ExpectedClosingParen"
            }
            InnerError::Parse(ParseError::ExpectedClosingBrace(..)) => {
                "ParseError::ExpectedClosingBrace"
            }
            InnerError::Parse(ParseError::ExpectedClosingBracket(..)) => {
                "ParseError::ExpectedClosingBracket"
            }
            InnerError::Parse(ParseError::TooDeep(..)) => "ParseError::TooDeep",
            InnerError::Compile(CompileError::UndefinedSymbol { .. }) => {
                "CompileError::UndefinedSymbol"
            }
            InnerError::Compile(CompileError::Arity { .. }) => "CompileError::Arity",
            InnerError::Compile(CompileError::TooManySlots { .. }) => "CompileError::TooManySlots",
            InnerError::Compile(CompileError::TooManyArguments { .. }) => {
                "CompileError::TooManyArguments"
            }
            InnerError::Runtime(RuntimeError::Arity { .. }) => "RuntimeError::Arity",
            InnerError::Runtime(RuntimeError::Conversion { .. })
            | InnerError::Runtime(RuntimeError::InvalidResult { .. }) => "RuntimeError::Conversion",
            InnerError::Runtime(RuntimeError::Host { .. }) => "RuntimeError::Host",
            InnerError::Runtime(RuntimeError::DeadlineExceeded) => "RuntimeError::DeadlineExceeded",
            InnerError::Runtime(RuntimeError::RecursionLimit(_)) => "RuntimeError::RecursionLimit",
            InnerError::Runtime(RuntimeError::NotCallable(_)) => "RuntimeError::NotCallable",
            InnerError::Runtime(_) => "RuntimeError::Internal",
            InnerError::Apply(_) => "ApplyChangeError",
            InnerError::Registry(_) => "RegistryError",
        };

        Some(Box::new(c))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let msg = match &self.cause {
            InnerError::Lexer(LexerError::UnterminatedString(..)) => {
                Some("Close the string with a matching `\"`.".to_string())
            }
            InnerError::Lexer(LexerError::InvalidFeatureId(..)) => Some(
                "Feature ids look like `/a/123` or `/area/openstreetmap.org/way/123`.".to_string(),
            ),
            InnerError::Parse(ParseError::UnexpectedEof(_)) => Some(
                "Input ended unexpectedly. Check for missing closing brackets or incomplete expressions."
                    .to_string(),
            ),
            InnerError::Parse(ParseError::TooDeep(..)) => {
                Some("Split the expression or flatten deeply nested brackets.".to_string())
            }
            InnerError::Parse(_) => Some("Check for syntax errors or misplaced tokens.".to_string()),
            InnerError::Compile(CompileError::UndefinedSymbol { name, .. }) => Some(format!(
                "`{name}` is neither a lambda parameter nor a known function."
            )),
            InnerError::Runtime(RuntimeError::DeadlineExceeded) => {
                Some("Raise the timeout or narrow the query.".to_string())
            }
            InnerError::Runtime(RuntimeError::RecursionLimit(_)) => {
                Some("Raise the maximum call depth if the nesting is intended.".to_string())
            }
            _ => None,
        };

        msg.map(|m| Box::new(m) as Box<dyn std::fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(
            miette::LabeledSpan::new_with_span(Some(format!("{}", self.cause)), self.location),
        )))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.source_code)
    }
}
