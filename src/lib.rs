// Declare modules publicly so they are part of the library interface
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod ffi;
pub mod lexer;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod session;
pub mod source;
pub mod types;

pub use environment::{EnvError, Environment};
pub use error::{Error, ErrorKind};
pub use evaluator::{EvalError, EvalResult, Evaluator, evaluate};
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser, parse_str};
pub use session::{Session, SessionConfig};
pub use source::Span;
pub use types::{Lambda, Node, Pair, Procedure, Sexpr, Symbol};
