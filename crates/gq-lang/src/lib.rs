//! `gq-lang` parses, simplifies, compiles and evaluates gq pipeline
//! expressions over a world of geographic features.
//!
//! ## Examples
//!
//! ```rust
//! use gq_lang::{Engine, MemoryWorld, Value};
//!
//! let engine = Engine::standard().unwrap();
//! let world = MemoryWorld::fixture();
//!
//! assert_eq!(engine.evaluate("add 1 2", &world).unwrap(), Value::Int(3));
//! assert_eq!(
//!     engine.evaluate("find [#building] | count", &world).unwrap(),
//!     Value::Int(3)
//! );
//!
//! // Parse into an expression tree and print it back.
//! let node = gq_lang::parse("find-feature /a/427900370 | area").unwrap();
//! assert_eq!(node.to_code(), "find-feature /a/427900370 | area");
//! ```
mod arena;
mod ast;
mod builtin;
mod compiler;
mod context;
mod convert;
mod engine;
mod error;
mod geo;
mod lexer;
mod number;
mod range;
mod registry;
mod simplifier;
mod value;
mod vm;
mod world;

use error::InnerError;

pub use arena::{Arena, ArenaId};
pub use ast::Parser as AstParser;
pub use ast::error::ParseError;
pub use ast::{Args as AstArgs, Expr as AstExpr, Literal as AstLiteral, Node as AstNode, Params as AstParams};
pub use compiler::{CompileError, compile};
pub use context::{Context, Deadline, Runtime};
pub use convert::{Adapter, ConversionError, Kind, Signature, convert};
pub use engine::{Applied, Engine, Options};
pub use error::{Error, InnerError as ErrorCause};
pub use geo::{Feature, FeatureId, FeatureIdError, FeatureType, Geometry, LatLng, Query, Tag};
pub use lexer::error::LexerError;
pub use lexer::token::{Token, TokenKind};
pub use number::Number;
pub use range::Range;
pub use registry::{MAX_ARGS, Registry, RegistryBuilder, RegistryError};
pub use simplifier::simplify;
pub use value::{
    ArrayCollection, Callable, Collection, CollectionIter, HostFunction, LambdaClosure,
    PartialApplication, Slots, Value,
};
pub use vm::error::RuntimeError;
pub use vm::instruction::{Instruction, Program};
pub use vm::{DEFAULT_MAX_CALL_DEPTH, MAX_SLOTS, Vm};
pub use world::{
    AddTag, ApplyChangeError, Change, ChangeSet, MemoryWorld, MutableWorld, SharedWorld, World,
};

pub type GqResult = Result<Value, Error>;

#[allow(clippy::result_large_err)]
pub fn parse(code: &str) -> Result<AstNode, error::Error> {
    let tokens = tokenize(code)?;
    AstParser::new(code, &tokens)
        .parse()
        .map_err(|e| error::Error::from_error(code, InnerError::Parse(e)))
}

/// Parses `code` as the continuation of a pipeline whose left-hand side is
/// `lhs`, so that `parse_with_lhs("area", lhs)` means `lhs | area`.
#[allow(clippy::result_large_err)]
pub fn parse_with_lhs(code: &str, lhs: AstNode) -> Result<AstNode, error::Error> {
    let tokens = tokenize(code)?;
    AstParser::new(code, &tokens)
        .parse_with_lhs(lhs)
        .map_err(|e| error::Error::from_error(code, InnerError::Parse(e)))
}

#[allow(clippy::result_large_err)]
pub fn tokenize(code: &str) -> Result<Vec<Token>, error::Error> {
    lexer::tokenize(code).map_err(|e| error::Error::from_error(code, InnerError::Lexer(e)))
}
