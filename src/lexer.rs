use logos::Logos;
use std::fmt;
use thiserror::Error;

use crate::Span;

/// Token classes of the reader. Parentheses are the only structural
/// characters; every other maximal run of non-whitespace is an atom.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"\s+")] // Skip whitespace
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[regex(r"[+-]?[0-9]+", parse_integer, priority = 3)]
    Integer(i64),
    #[token("#t", |_| true)]
    #[token("#f", |_| false)]
    Boolean(bool),
    #[regex(r"[^\s()]+", |lex| lex.slice().to_string())]
    Symbol(String),
}

fn parse_integer(lex: &mut logos::Lexer<TokenKind>) -> Result<i64, LexerErrorKind> {
    let slice = lex.slice();
    slice
        .parse::<i64>()
        .map_err(|_| LexerErrorKind::IntegerOutOfRange(slice.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            TokenKind::Symbol(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Error)]
pub enum LexerErrorKind {
    #[error("integer literal out of range: '{0}'")]
    IntegerOutOfRange(String),
    #[default]
    #[error("invalid token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
}

type LexerRangedResult<T> = Result<T, LexerError>;

// Helper function to tokenize a string directly (useful for tests and parser)
pub fn tokenize(input: &str) -> LexerRangedResult<Vec<Token>> {
    TokenKind::lexer(input)
        .spanned()
        .map(|(result, range)| {
            let span = Span::new(range.start, range.end);
            match result {
                Ok(kind) => Ok(Token { kind, span }),
                Err(error) => Err(LexerError { error, span }),
            }
        })
        .collect()
}
