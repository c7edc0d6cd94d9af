use std::fmt::{self, Display, Formatter};

use smol_str::SmolStr;

use crate::{
    geo::{FeatureId, LatLng, quote},
    number::format_float,
    range::Range,
};

#[derive(PartialEq, Debug, Clone)]
pub struct Token {
    pub range: Range,
    pub kind: TokenKind,
}

impl Token {
    #[inline(always)]
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum TokenKind {
    Ampersand,
    Arrow,
    BoolLiteral(bool),
    Colon,
    Comma,
    Eof,
    Equal,
    FeatureId(FeatureId),
    FloatLiteral(f64),
    IntLiteral(i64),
    LatLng(LatLng),
    LBrace,
    LBracket,
    LParen,
    Pipe,
    RBrace,
    RBracket,
    RParen,
    StringLiteral(String),
    Symbol(SmolStr),
    TagKey(SmolStr),
}

impl TokenKind {
    /// Whether this token can begin an argument of a juxtaposed call.
    pub fn starts_atom(&self) -> bool {
        matches!(
            self,
            TokenKind::BoolLiteral(_)
                | TokenKind::FeatureId(_)
                | TokenKind::FloatLiteral(_)
                | TokenKind::IntLiteral(_)
                | TokenKind::LatLng(_)
                | TokenKind::LBrace
                | TokenKind::LBracket
                | TokenKind::LParen
                | TokenKind::StringLiteral(_)
                | TokenKind::Symbol(_)
                | TokenKind::TagKey(_)
        )
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.kind)
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match &self {
            TokenKind::Ampersand => write!(f, "&"),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::BoolLiteral(b) => write!(f, "{}", b),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Eof => write!(f, "EOF"),
            TokenKind::Equal => write!(f, "="),
            TokenKind::FeatureId(id) => write!(f, "{}", id),
            TokenKind::FloatLiteral(n) => write!(f, "{}", format_float(*n)),
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::LatLng(ll) => write!(f, "{}", ll),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::LParen => write!(f, "("),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::StringLiteral(s) => write!(f, "{}", quote(s)),
            TokenKind::Symbol(s) => write!(f, "{}", s),
            TokenKind::TagKey(key) => write!(f, "{}", key),
        }
    }
}
