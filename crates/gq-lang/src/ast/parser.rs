use smol_str::SmolStr;

use crate::{
    geo::{Query, Tag},
    lexer::token::{Token, TokenKind},
    number::format_float,
    range::Range,
};

use super::{
    error::ParseError,
    node::{Args, Expr, Literal, Node, Params},
};

pub const COLLECTION: &str = "collection";
pub const PAIR: &str = "pair";

/// How deeply brackets, lambdas and pipeline stages may nest. Every later
/// pass recurses over the tree, so the bound keeps them on the stack.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Recursive descent over a token vector produced by [`crate::tokenize`].
///
/// Precedence, loosest first: `|` pipelines, juxtaposed calls, atoms.
pub struct Parser<'a> {
    code: &'a str,
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    eof: Token,
}

impl<'a> Parser<'a> {
    pub fn new(code: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            code,
            tokens,
            pos: 0,
            depth: 0,
            eof: Token {
                range: Range::new(code.len(), code.len()),
                kind: TokenKind::Eof,
            },
        }
    }

    pub fn parse(&mut self) -> Result<Node, ParseError> {
        let node = self.parse_pipeline()?;
        self.expect_eof()?;
        Ok(node)
    }

    /// Parses the input as if it were written `lhs | <input>`.
    pub fn parse_with_lhs(&mut self, lhs: Node) -> Result<Node, ParseError> {
        let node = self.parse_piped_call(lhs)?;
        let node = self.parse_stages(node)?;
        self.expect_eof()?;
        Ok(node)
    }

    fn parse_pipeline(&mut self) -> Result<Node, ParseError> {
        let node = self.parse_call()?;
        self.parse_stages(node)
    }

    /// Each stage wraps the pipeline so far, so stages count towards the
    /// nesting depth.
    fn parse_stages(&mut self, mut node: Node) -> Result<Node, ParseError> {
        let depth = self.depth;
        while let Some(pipe) = self.eat(&TokenKind::Pipe) {
            self.descend(&pipe)?;
            node = self.parse_piped_call(node)?;
        }
        self.depth = depth;
        Ok(node)
    }

    fn parse_piped_call(&mut self, lhs: Node) -> Result<Node, ParseError> {
        let function = self.parse_atom()?;
        let mut args = vec![lhs];
        self.parse_args(&mut args)?;
        let range = std::iter::once(&function)
            .chain(args.iter())
            .filter_map(|node| node.range)
            .reduce(|a, b| a.merge(&b));
        Ok(Node::pipelined_call(function, args).with_range(range))
    }

    fn parse_call(&mut self) -> Result<Node, ParseError> {
        let function = self.parse_atom()?;
        self.parse_call_from(function)
    }

    fn parse_call_from(&mut self, function: Node) -> Result<Node, ParseError> {
        let mut args = Args::new();
        self.parse_args(&mut args)?;

        match args.last() {
            Some(last) => {
                let range = span(&function, last);
                Ok(Node::call(function, args).with_range(range))
            }
            None => Ok(function),
        }
    }

    fn parse_args(&mut self, args: &mut Args) -> Result<(), ParseError> {
        while self.peek().kind.starts_atom() {
            args.push(self.parse_atom()?);
        }
        Ok(())
    }

    fn parse_atom(&mut self) -> Result<Node, ParseError> {
        let token = self.advance();
        let range = Some(token.range);

        match &token.kind {
            TokenKind::Symbol(name) => Ok(Node::symbol(name.clone()).with_range(range)),
            TokenKind::BoolLiteral(b) => Ok(Node::literal(Literal::Bool(*b)).with_range(range)),
            TokenKind::IntLiteral(n) => Ok(Node::literal(Literal::Int(*n)).with_range(range)),
            TokenKind::FloatLiteral(n) => Ok(Node::literal(Literal::Float(*n)).with_range(range)),
            TokenKind::StringLiteral(s) => {
                Ok(Node::literal(Literal::String(s.clone())).with_range(range))
            }
            TokenKind::FeatureId(id) => {
                Ok(Node::literal(Literal::FeatureId(id.clone())).with_range(range))
            }
            TokenKind::LatLng(ll) => Ok(Node::literal(Literal::Point(*ll)).with_range(range)),
            TokenKind::TagKey(key) => {
                let (tag, end) = self.parse_tag(key.clone(), &token)?;
                Ok(Node::literal(Literal::Tag(tag)).with_range(Some(token.range.merge(&end))))
            }
            TokenKind::LParen => self.parse_paren(&token),
            TokenKind::LBrace => self.parse_brace(&token),
            TokenKind::LBracket => self.parse_query(&token),
            TokenKind::Eof => Err(ParseError::UnexpectedEof(token)),
            _ => Err(self.unexpected(token)),
        }
    }

    /// A single symbol, lambda or parenthesised expression in parentheses is
    /// an explicit zero-argument call: `(f)`, `({-> 42})`, `((f 1))`. Any
    /// other parenthesised expression is grouping.
    fn parse_paren(&mut self, open: &Token) -> Result<Node, ParseError> {
        self.descend(open)?;
        let head = self.peek().kind.clone();
        let atom = self.parse_atom()?;

        let callable = matches!(head, TokenKind::Symbol(_) | TokenKind::LParen)
            || matches!(atom.expr, Expr::Lambda { .. });
        if callable && self.peek().kind == TokenKind::RParen {
            let close = self.advance();
            self.ascend();
            return Ok(Node::call(atom, Args::new())
                .with_range(Some(open.range.merge(&close.range))));
        }

        let inner = self.parse_call_from(atom)?;
        let inner = self.parse_stages(inner)?;
        self.expect_closing(TokenKind::RParen, ParseError::ExpectedClosingParen)?;
        self.ascend();
        Ok(inner)
    }

    fn parse_brace(&mut self, open: &Token) -> Result<Node, ParseError> {
        self.descend(open)?;
        let node = self.parse_brace_contents(open)?;
        self.ascend();
        Ok(node)
    }

    fn parse_brace_contents(&mut self, open: &Token) -> Result<Node, ParseError> {
        if self.is_lambda_head() {
            return self.parse_lambda(open);
        }

        let mut pairs = Args::new();
        if self.peek().kind != TokenKind::RBrace {
            loop {
                let item = self.parse_pipeline()?;
                let (key, value) = match self.eat(&TokenKind::Colon) {
                    Some(_) => (item, self.parse_pipeline()?),
                    None => (Node::literal(Literal::Int(pairs.len() as i64)), item),
                };
                let range = span(&key, &value).or(value.range);
                pairs.push(Node::call(Node::symbol(PAIR), vec![key, value]).with_range(range));

                if self.eat(&TokenKind::Comma).is_none() {
                    break;
                }
            }
        }

        let close = self.expect_closing(TokenKind::RBrace, ParseError::ExpectedClosingBrace)?;
        Ok(Node::call(Node::symbol(COLLECTION), pairs)
            .with_range(Some(open.range.merge(&close.range))))
    }

    /// Looks ahead for `->` or `symbol (, symbol)* ->` after an opening brace.
    fn is_lambda_head(&self) -> bool {
        let mut offset = self.pos;
        loop {
            match self.tokens.get(offset).map(|t| &t.kind) {
                Some(TokenKind::Arrow) => return true,
                Some(TokenKind::Symbol(_)) => match self.tokens.get(offset + 1).map(|t| &t.kind) {
                    Some(TokenKind::Arrow) => return true,
                    Some(TokenKind::Comma) => offset += 2,
                    _ => return false,
                },
                _ => return false,
            }
        }
    }

    fn parse_lambda(&mut self, open: &Token) -> Result<Node, ParseError> {
        let mut params = Params::new();
        loop {
            let token = self.advance();
            match &token.kind {
                TokenKind::Arrow => break,
                TokenKind::Symbol(name) => params.push(name.clone()),
                TokenKind::Comma => continue,
                TokenKind::Eof => return Err(ParseError::UnexpectedEof(token)),
                _ => return Err(self.unexpected(token)),
            }
        }

        let body = self.parse_pipeline()?;
        let close = self.expect_closing(TokenKind::RBrace, ParseError::ExpectedClosingBrace)?;
        Ok(Node::new(Expr::Lambda {
            params,
            body: Box::new(body),
        })
        .with_range(Some(open.range.merge(&close.range))))
    }

    fn parse_query(&mut self, open: &Token) -> Result<Node, ParseError> {
        let query = if self.peek().kind == TokenKind::RBracket {
            Query::All
        } else {
            self.parse_query_union()?
        };
        let close =
            self.expect_closing(TokenKind::RBracket, ParseError::ExpectedClosingBracket)?;
        Ok(Node::literal(Literal::Query(query)).with_range(Some(open.range.merge(&close.range))))
    }

    fn parse_query_union(&mut self) -> Result<Query, ParseError> {
        let mut terms = vec![self.parse_query_intersection()?];
        while self.eat(&TokenKind::Pipe).is_some() {
            terms.push(self.parse_query_intersection()?);
        }
        Ok(group_query(terms, true))
    }

    fn parse_query_intersection(&mut self) -> Result<Query, ParseError> {
        let mut terms = vec![self.parse_query_term()?];
        while self.eat(&TokenKind::Ampersand).is_some() {
            terms.push(self.parse_query_term()?);
        }
        Ok(group_query(terms, false))
    }

    fn parse_query_term(&mut self) -> Result<Query, ParseError> {
        let token = self.advance();
        match &token.kind {
            TokenKind::TagKey(key) => {
                if self.peek().kind != TokenKind::Equal {
                    return Ok(Query::Keyed(key.clone()));
                }
                let (tag, _) = self.parse_tag(key.clone(), &token)?;
                Ok(Query::Tagged(tag))
            }
            TokenKind::LParen => {
                self.descend(&token)?;
                let query = if self.peek().kind == TokenKind::RParen {
                    Query::Union(Vec::new())
                } else {
                    self.parse_query_union()?
                };
                self.expect_closing(TokenKind::RParen, ParseError::ExpectedClosingParen)?;
                self.ascend();
                Ok(query)
            }
            TokenKind::LBracket => {
                self.expect_closing(TokenKind::RBracket, ParseError::ExpectedClosingBracket)?;
                Ok(Query::All)
            }
            TokenKind::Eof => Err(ParseError::UnexpectedEof(token)),
            _ => Err(self.unexpected(token)),
        }
    }

    /// Parses the optional `=value` after a tag key. Returns the tag and the
    /// range of its last token.
    fn parse_tag(&mut self, key: SmolStr, key_token: &Token) -> Result<(Tag, Range), ParseError> {
        if self.eat(&TokenKind::Equal).is_none() {
            return Ok((Tag::new(key, ""), key_token.range));
        }

        let token = self.advance();
        let value = match &token.kind {
            TokenKind::Symbol(s) => s.to_string(),
            TokenKind::StringLiteral(s) => s.clone(),
            TokenKind::IntLiteral(n) => n.to_string(),
            TokenKind::FloatLiteral(n) => format_float(*n),
            TokenKind::BoolLiteral(b) => b.to_string(),
            TokenKind::Eof => return Err(ParseError::UnexpectedEof(token)),
            _ => return Err(self.unexpected(token)),
        };
        Ok((Tag::new(key, value), token.range))
    }

    fn descend(&mut self, token: &Token) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(token.clone(), self.remaining(token)));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !token.is_eof() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> Option<Token> {
        if &self.peek().kind == kind {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect_closing(
        &mut self,
        kind: TokenKind,
        error: fn(Token, String) -> ParseError,
    ) -> Result<Token, ParseError> {
        match self.eat(&kind) {
            Some(token) => Ok(token),
            None => {
                let token = self.peek().clone();
                let remaining = self.remaining(&token);
                Err(error(token, remaining))
            }
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            token if token.is_eof() => Ok(()),
            token => Err(self.unexpected(token.clone())),
        }
    }

    #[cold]
    fn unexpected(&self, token: Token) -> ParseError {
        let remaining = self.remaining(&token);
        ParseError::UnexpectedToken(token, remaining)
    }

    fn remaining(&self, token: &Token) -> String {
        self.code
            .get(token.range.start..)
            .unwrap_or_default()
            .to_string()
    }
}

fn span(first: &Node, last: &Node) -> Option<Range> {
    match (first.range, last.range) {
        (Some(a), Some(b)) => Some(a.merge(&b)),
        (a, b) => a.or(b),
    }
}

/// A single term stands for itself. Parenthesised groups stay nested so
/// that `(#a | #b) | #c` reads back as written.
fn group_query(mut terms: Vec<Query>, union: bool) -> Query {
    if terms.len() == 1 {
        if let Some(term) = terms.pop() {
            return term;
        }
    }

    if union {
        Query::Union(terms)
    } else {
        Query::Intersection(terms)
    }
}
