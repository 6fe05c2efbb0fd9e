use crate::Span;
use crate::lexer::{LexerError, Token, TokenKind};
use crate::session::DEFAULT_MAX_DEPTH;
use crate::types::{Node, Sexpr, Symbol};
use std::iter::Peekable;
use std::vec::IntoIter;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected token '{}' at {}, expected {expected}", .found.kind, .found.span)]
    UnexpectedToken { found: Token, expected: String },
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error(transparent)]
    LexerError(#[from] LexerError),
    #[error("expression nested deeper than {limit} levels")]
    TooDeep { limit: usize, span: Span },
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Peekable<IntoIter<Token>>,
    max_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens: tokens.into_iter().peekable(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Limits how deeply lists may nest before parsing fails with
    /// [`ParseError::TooDeep`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn next_token(&mut self) -> Option<Token> {
        self.tokens.next()
    }

    /// Parses a single S-expression from the token stream.
    pub fn parse_expr(&mut self) -> ParseResult<Node> {
        let token = self.next_token();
        self.parse_expr_with_token(token, 0)
    }

    fn parse_expr_with_token(&mut self, token: Option<Token>, depth: usize) -> ParseResult<Node> {
        match token {
            Some(Token {
                kind: TokenKind::LParen,
                span,
            }) => self.parse_list(span, depth + 1),
            Some(
                found @ Token {
                    kind: TokenKind::RParen,
                    ..
                },
            ) => Err(ParseError::UnexpectedToken {
                found,
                expected: "an atom or '('".to_string(),
            }),
            Some(atom) => self.parse_atom(atom),
            None => Err(ParseError::UnexpectedEof("an expression".to_string())),
        }
    }

    /// Parses an atomic expression (symbol, integer, boolean).
    fn parse_atom(&mut self, token: Token) -> ParseResult<Node> {
        Ok(Node::new(
            match token.kind {
                TokenKind::Symbol(s) => Sexpr::Symbol(Symbol::from(s)),
                TokenKind::Integer(n) => Sexpr::Number(n),
                TokenKind::Boolean(b) => Sexpr::Boolean(b),
                other_token => Err(ParseError::UnexpectedToken {
                    found: Token {
                        kind: other_token,
                        span: token.span,
                    },
                    expected: "an atom (symbol, integer, boolean)".to_string(),
                })?,
            },
            token.span,
        ))
    }

    /// Parses the elements of a list after its opening `(`. Elements are
    /// gathered iteratively; only nesting recurses.
    fn parse_list(&mut self, open: Span, depth: usize) -> ParseResult<Node> {
        if depth > self.max_depth {
            return Err(ParseError::TooDeep {
                limit: self.max_depth,
                span: open,
            });
        }
        let mut items = Vec::new();
        loop {
            match self.next_token() {
                Some(Token {
                    kind: TokenKind::RParen,
                    span,
                }) => return Ok(Node::new_list(items, open.merge(span))),
                Some(token) => items.push(self.parse_expr_with_token(Some(token), depth)?),
                None => return Err(ParseError::UnexpectedEof("')'".to_string())),
            }
        }
    }

    /// Parses exactly one top-level expression; any token after it is an error.
    pub fn parse(mut self) -> ParseResult<Node> {
        let expr = self.parse_expr()?;

        if let Some(found) = self.next_token() {
            Err(ParseError::UnexpectedToken {
                found,
                expected: "end of input".to_string(),
            })
        } else {
            Ok(expr)
        }
    }
}

// Helper function to lex and parse a string directly
pub fn parse_str(input: &str) -> ParseResult<Node> {
    parse_str_with_max_depth(input, DEFAULT_MAX_DEPTH)
}

pub fn parse_str_with_max_depth(input: &str, max_depth: usize) -> ParseResult<Node> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::new(tokens).with_max_depth(max_depth).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::LexerErrorKind;

    fn assert_parse(input: &str, expected: Node) {
        match parse_str(input) {
            Ok(result) => assert_eq!(result, expected, "Input: '{}'", input),
            Err(e) => panic!("Parsing failed for input '{}': {}", input, e),
        }
    }

    fn assert_parse_error(input: &str, expected_error_variant: ParseError) {
        match parse_str(input) {
            Ok(result) => panic!(
                "Expected parsing to fail for input '{}', but got: {:?}",
                input, result
            ),
            Err(e) => {
                assert_eq!(
                    std::mem::discriminant(&e),
                    std::mem::discriminant(&expected_error_variant),
                    "Input: '{}', Expected error variant like {:?}, got: {:?}",
                    input,
                    expected_error_variant,
                    e
                );
            }
        }
    }

    fn assert_parsed_sexpr_string(input: &str, expected_output: &str) {
        let node = match parse_str(input) {
            Ok(result) => result,
            Err(e) => panic!("Parsing failed for input '{}': {}", input, e),
        };
        assert_eq!(node.to_string(), expected_output, "Input: '{}'", input);
    }

    fn node_number(n: i64, start: usize, end: usize) -> Node {
        Node::new_number(n, Span::new(start, end))
    }

    fn node_symbol(s: &str, start: usize, end: usize) -> Node {
        Node::new_symbol(s, Span::new(start, end))
    }

    fn unexpected(kind: TokenKind, start: usize, end: usize) -> ParseError {
        ParseError::UnexpectedToken {
            found: Token {
                kind,
                span: Span::new(start, end),
            },
            expected: String::new(),
        }
    }

    #[test]
    fn test_parse_atoms() {
        assert_parse("123", node_number(123, 0, 3));
        assert_parse("-4", node_number(-4, 0, 2));
        assert_parse("symbol", node_symbol("symbol", 0, 6));
        assert_parse("+", node_symbol("+", 0, 1));
        assert_parse("#t", Node::new_bool(true, Span::new(0, 2)));
        assert_parse("#f", Node::new_bool(false, Span::new(0, 2)));
        assert_parse("  x  ", node_symbol("x", 2, 3));
    }

    #[test]
    fn test_parse_empty_list() {
        assert_parse("()", Node::new_nil(Span::new(0, 2)));
        assert_parse("( )", Node::new_nil(Span::new(0, 3)));
    }

    #[test]
    fn test_parse_simple_list() {
        let node = parse_str("(+ 10 20)").expect("parses");
        assert_eq!(node.span, Span::new(0, 9));
        assert_eq!(
            node.list_elements(),
            Some(vec![
                node_symbol("+", 1, 2),
                node_number(10, 3, 5),
                node_number(20, 6, 8),
            ])
        );
        assert_parsed_sexpr_string("(+ 10 20)", "(+ 10 20)");
        assert_parsed_sexpr_string("(list #t #f)", "(list #t #f)");
    }

    #[test]
    fn test_parse_nested_list() {
        assert_parsed_sexpr_string("(a (b c) d)", "(a (b c) d)");
        assert_parsed_sexpr_string("(()())", "(() ())");
        assert_parsed_sexpr_string(
            "(define test (lambda (a b)(+ a b)))",
            "(define test (lambda (a b) (+ a b)))",
        );

        let node = parse_str("(a (b c) d)").expect("parses");
        let elements = node.list_elements().expect("proper list");
        assert_eq!(elements[1].span, Span::new(3, 8));
    }

    #[test]
    fn test_parse_long_list() {
        let input = format!("({})", vec!["1"; 2_000].join(" "));
        let node = parse_str(&input).expect("parses");
        assert_eq!(node.list_elements().map(|items| items.len()), Some(2_000));
    }

    #[test]
    fn test_parse_errors_unexpected_token() {
        assert_parse_error("(1 2", ParseError::UnexpectedEof(String::new()));
        assert_parse_error(")", unexpected(TokenKind::RParen, 0, 1));
        assert_parse_error("(1))", unexpected(TokenKind::RParen, 3, 4));
        assert_parse_error("(", ParseError::UnexpectedEof(String::new()));
    }

    #[test]
    fn test_parse_trailing_garbage() {
        assert_parse_error("1 2", unexpected(TokenKind::Integer(2), 2, 3));
        assert_parse_error("(+ 1 2) x", unexpected(TokenKind::Symbol("x".into()), 8, 9));
        assert_eq!(
            parse_str("(1))"),
            Err(ParseError::UnexpectedToken {
                found: Token {
                    kind: TokenKind::RParen,
                    span: Span::new(3, 4),
                },
                expected: "end of input".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_errors_eof() {
        assert_parse_error("", ParseError::UnexpectedEof(String::new()));
        assert_parse_error("   ", ParseError::UnexpectedEof(String::new()));
    }

    #[test]
    fn test_parse_lexer_error_propagation() {
        assert_eq!(
            parse_str("(+ 1 99999999999999999999)"),
            Err(ParseError::LexerError(LexerError {
                error: LexerErrorKind::IntegerOutOfRange("99999999999999999999".to_string()),
                span: Span::new(5, 25),
            }))
        );
    }

    #[test]
    fn test_parse_depth_limit() {
        let nested = |depth: usize| format!("{}{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse_str_with_max_depth(&nested(8), 8).is_ok());
        assert_eq!(
            parse_str_with_max_depth(&nested(9), 8),
            Err(ParseError::TooDeep {
                limit: 8,
                span: Span::new(8, 9),
            })
        );
    }

    #[test]
    fn test_error_messages() {
        let err = parse_str("(1))").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected token ')' at 3..4, expected end of input"
        );
        let err = parse_str("(1").unwrap_err();
        assert_eq!(err.to_string(), "unexpected end of input, expected ')'");
    }
}
