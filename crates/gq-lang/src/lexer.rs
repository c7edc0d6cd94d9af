pub mod error;
pub mod token;

use error::LexerError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while, take_while1},
    character::complete::{anychar, char, digit1, multispace0, one_of, satisfy},
    combinator::{map, opt, recognize, value},
    error::{ErrorKind, ParseError},
    multi::many0,
    sequence::{pair, preceded},
};
use token::{Token, TokenKind};

use crate::{
    geo::{FeatureId, LatLng},
    number::Number,
    range::{Range, Span},
};

const FEATURE_ID_TERMINATORS: &str = "(){}[]|,&=:\"";

#[derive(Debug, Clone, Copy, PartialEq)]
enum FailureKind {
    UnterminatedString,
    TwoDecimalPoints,
    UnexpectedMinus,
    InvalidNumber,
    InvalidFeatureId,
}

/// nom error carrying an optional fatal classification. Plain `Error`s let
/// `alt` try the next token kind; `Failure`s stop tokenizing.
#[derive(Debug)]
struct Failure<'a> {
    input: Span<'a>,
    kind: Option<FailureKind>,
}

impl<'a> ParseError<Span<'a>> for Failure<'a> {
    fn from_error_kind(input: Span<'a>, _kind: ErrorKind) -> Self {
        Failure { input, kind: None }
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type LexResult<'a, T> = IResult<Span<'a>, T, Failure<'a>>;

macro_rules! define_token_parser {
    ($name:ident, $tag:expr, $kind:expr) => {
        fn $name(input: Span) -> LexResult<Token> {
            map(tag($tag), |span: Span| Token {
                range: span.into(),
                kind: $kind,
            })
            .parse(input)
        }
    };
}

/// Splits `code` into tokens, ending with a single `Eof` token.
///
/// Tokenizing stops at the first malformed token; the error carries the
/// offending byte range and the input that remained from there.
pub fn tokenize(code: &str) -> Result<Vec<Token>, LexerError> {
    let mut input = Span::new(code);
    let mut tokens = Vec::with_capacity(code.len() / 3 + 1);

    loop {
        let skipped: LexResult<Span> = multispace0(input);
        if let Ok((rest, _)) = skipped {
            input = rest;
        }

        if input.fragment().is_empty() {
            tokens.push(Token {
                range: Range::new(code.len(), code.len()),
                kind: TokenKind::Eof,
            });
            return Ok(tokens);
        }

        match next_token(input) {
            Ok((rest, token)) => {
                tokens.push(token);
                input = rest;
            }
            Err(nom::Err::Error(failure)) | Err(nom::Err::Failure(failure)) => {
                return Err(lexer_error(code, input, failure));
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(lexer_error(code, input, Failure { input, kind: None }));
            }
        }
    }
}

fn lexer_error(code: &str, at: Span, failure: Failure) -> LexerError {
    let start = match failure.kind {
        Some(_) => failure.input.location_offset(),
        None => at.location_offset(),
    };
    let remaining = code.get(start..).unwrap_or_default();
    let width = remaining.chars().next().map(char::len_utf8).unwrap_or(0);
    let range = Range::new(start, start + width);
    let remaining = remaining.to_string();

    match failure.kind {
        Some(FailureKind::UnterminatedString) => LexerError::UnterminatedString(range, remaining),
        Some(FailureKind::TwoDecimalPoints) => LexerError::TwoDecimalPoints(range, remaining),
        Some(FailureKind::UnexpectedMinus) => LexerError::UnexpectedMinus(range, remaining),
        Some(FailureKind::InvalidNumber) => LexerError::InvalidNumber(range, remaining),
        Some(FailureKind::InvalidFeatureId) => LexerError::InvalidFeatureId(range, remaining),
        None => LexerError::UnexpectedCharacter(range, remaining),
    }
}

fn fail<'a, T>(input: Span<'a>, kind: FailureKind) -> LexResult<'a, T> {
    Err(nom::Err::Failure(Failure {
        input,
        kind: Some(kind),
    }))
}

fn next_token(input: Span) -> LexResult<Token> {
    alt((
        arrow,
        punctuation,
        string_literal,
        number,
        feature_id,
        tag_key,
        symbol,
    ))
    .parse(input)
}

define_token_parser!(arrow, "->", TokenKind::Arrow);
define_token_parser!(l_paren, "(", TokenKind::LParen);
define_token_parser!(r_paren, ")", TokenKind::RParen);
define_token_parser!(l_brace, "{", TokenKind::LBrace);
define_token_parser!(r_brace, "}", TokenKind::RBrace);
define_token_parser!(l_bracket, "[", TokenKind::LBracket);
define_token_parser!(r_bracket, "]", TokenKind::RBracket);
define_token_parser!(comma, ",", TokenKind::Comma);
define_token_parser!(colon, ":", TokenKind::Colon);
define_token_parser!(equal, "=", TokenKind::Equal);
define_token_parser!(ampersand, "&", TokenKind::Ampersand);
define_token_parser!(pipe, "|", TokenKind::Pipe);

fn punctuation(input: Span) -> LexResult<Token> {
    alt((
        l_paren, r_paren, l_brace, r_brace, l_bracket, r_bracket, comma, colon, equal, ampersand, pipe,
    ))
    .parse(input)
}

fn string_literal(input: Span) -> LexResult<Token> {
    let opening: LexResult<char> = char('"').parse(input);
    let (rest, _) = opening?;
    let fragments: LexResult<Vec<String>> = many0(string_fragment).parse(rest);
    let (rest, fragments) = fragments?;
    let closing: LexResult<char> = char('"').parse(rest);

    match closing {
        Ok((rest, _)) => Ok((
            rest,
            Token {
                range: Range::new(input.location_offset(), rest.location_offset()),
                kind: TokenKind::StringLiteral(fragments.concat()),
            },
        )),
        Err(_) => fail(input, FailureKind::UnterminatedString),
    }
}

fn string_fragment(input: Span) -> LexResult<String> {
    alt((
        map(is_not("\"\\"), |span: Span| span.fragment().to_string()),
        map(
            preceded(
                char('\\'),
                alt((value('\n', char('n')), value('\t', char('t')), anychar)),
            ),
            |c: char| c.to_string(),
        ),
    ))
    .parse(input)
}

fn numeric_text(input: Span) -> LexResult<Span> {
    alt((float_keyword, decimal_text)).parse(input)
}

fn decimal_text(input: Span) -> LexResult<Span> {
    recognize((
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

/// `inf`, `-inf` and `nan`, unless they begin a longer symbol such as `info`.
fn float_keyword(input: Span) -> LexResult<Span> {
    let keyword: LexResult<Span> =
        recognize(pair(opt(char('-')), alt((tag("inf"), tag("nan"))))).parse(input);
    let (rest, text) = keyword?;

    let fragment = rest.fragment();
    let continues_symbol = fragment.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        || (fragment.starts_with('-') && !fragment.starts_with("->"));
    if continues_symbol {
        return Err(nom::Err::Error(Failure { input, kind: None }));
    }

    Ok((rest, text))
}

fn classify<'a>(at: Span<'a>, text: &str) -> Result<Number, nom::Err<Failure<'a>>> {
    let failure = |kind| {
        nom::Err::Failure(Failure {
            input: at,
            kind: Some(kind),
        })
    };

    match text {
        "inf" => return Ok(Number::Float(f64::INFINITY)),
        "-inf" => return Ok(Number::Float(f64::NEG_INFINITY)),
        "nan" | "-nan" => return Ok(Number::Float(f64::NAN)),
        _ => {}
    }

    match text.matches('.').count() {
        0 if !text.contains(['e', 'E']) => text
            .parse::<i64>()
            .map(Number::Int)
            .map_err(|_| failure(FailureKind::InvalidNumber)),
        // Overflowing literals such as `1e999` are rejected rather than read
        // as infinity.
        0 | 1 => text
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Number::Float)
            .ok_or_else(|| failure(FailureKind::InvalidNumber)),
        _ => Err(failure(FailureKind::TwoDecimalPoints)),
    }
}

fn number(input: Span) -> LexResult<Token> {
    let Ok((rest, text)) = numeric_text(input) else {
        if input.fragment().starts_with('-') {
            return fail(input, FailureKind::UnexpectedMinus);
        }
        return Err(nom::Err::Error(Failure { input, kind: None }));
    };

    let first = classify(input, text.fragment())?;

    // `51.5,-0.1` written without spaces is a single lat/lng literal.
    if let Number::Float(lat) = first {
        let second: LexResult<Span> = preceded(char(','), numeric_text).parse(rest);
        if let Ok((after, lng_text)) = second {
            if let Ok(Number::Float(lng)) = classify(lng_text, lng_text.fragment()) {
                return finish_number(input, after, TokenKind::LatLng(LatLng::new(lat, lng)));
            }
        }
    }

    let kind = match first {
        Number::Int(n) => TokenKind::IntLiteral(n),
        Number::Float(n) => TokenKind::FloatLiteral(n),
    };
    finish_number(input, rest, kind)
}

fn finish_number<'a>(start: Span<'a>, rest: Span<'a>, kind: TokenKind) -> LexResult<'a, Token> {
    if rest.fragment().starts_with('-') && !rest.fragment().starts_with("->") {
        return fail(rest, FailureKind::UnexpectedMinus);
    }

    Ok((
        rest,
        Token {
            range: Range::new(start.location_offset(), rest.location_offset()),
            kind,
        },
    ))
}

fn feature_id(input: Span) -> LexResult<Token> {
    let recognized: LexResult<Span> = recognize(pair(
        char('/'),
        take_while(|c: char| !c.is_whitespace() && !FEATURE_ID_TERMINATORS.contains(c)),
    ))
    .parse(input);
    let (rest, span) = recognized?;

    match span.fragment().parse::<FeatureId>() {
        Ok(id) => Ok((
            rest,
            Token {
                range: span.into(),
                kind: TokenKind::FeatureId(id),
            },
        )),
        Err(_) => fail(input, FailureKind::InvalidFeatureId),
    }
}

fn tag_key(input: Span) -> LexResult<Token> {
    map(
        recognize(pair(
            one_of("#@"),
            take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')),
        )),
        |span: Span| Token {
            range: span.into(),
            kind: TokenKind::TagKey((*span.fragment()).into()),
        },
    )
    .parse(input)
}

fn symbol(input: Span) -> LexResult<Token> {
    let first: LexResult<char> = satisfy(|c: char| c.is_ascii_alphabetic()).parse(input);
    first?;

    let fragment = input.fragment();
    let len = fragment
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
        .count();
    // A trailing `-` belongs to a following `->`, never to the symbol.
    let len = fragment[..len].trim_end_matches('-').len();

    let taken: LexResult<Span> = take(len).parse(input);
    let (rest, span) = taken?;
    let kind = match *span.fragment() {
        "true" => TokenKind::BoolLiteral(true),
        "false" => TokenKind::BoolLiteral(false),
        name => TokenKind::Symbol(name.into()),
    };

    Ok((
        rest,
        Token {
            range: span.into(),
            kind,
        },
    ))
}
