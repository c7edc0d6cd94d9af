pub mod code;
pub mod error;
pub mod node;
pub mod parser;

pub use node::{Args, Expr, Literal, Node, Params};
pub use parser::Parser;
