use crate::environment::EnvError;
use crate::evaluator::EvalError;
use crate::parser::ParseError;
use crate::source::Span;
use std::fmt;
use thiserror::Error;

/// Coarse classification shared by every stage, used for the printed form of
/// a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    UnboundVariable,
    Arity,
    Type,
    NotAProcedure,
    Arithmetic,
    RecursionLimit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::UnboundVariable => "UnboundVariable",
            ErrorKind::Arity => "ArityError",
            ErrorKind::Type => "TypeError",
            ErrorKind::NotAProcedure => "NotAProcedure",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::RecursionLimit => "RecursionLimit",
        };
        f.write_str(name)
    }
}

/// Any failure of a read-evaluate cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(ParseError::TooDeep { .. }) => ErrorKind::RecursionLimit,
            Error::Parse(_) => ErrorKind::Syntax,
            Error::Eval(eval_err) => match eval_err {
                EvalError::EnvError(EnvError::UnboundVariable(..)) => ErrorKind::UnboundVariable,
                EvalError::EnvError(EnvError::ArityMismatch { .. })
                | EvalError::ArityMismatch { .. } => ErrorKind::Arity,
                EvalError::NotAProcedure(..) => ErrorKind::NotAProcedure,
                EvalError::TypeMismatch { .. } => ErrorKind::Type,
                EvalError::InvalidSpecialForm(..) => ErrorKind::Syntax,
                EvalError::Arithmetic(..) => ErrorKind::Arithmetic,
                EvalError::DepthExceeded { .. } => ErrorKind::RecursionLimit,
            },
        }
    }

    /// Source location of the failure; `None` when input ended early.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Parse(parse_err) => match parse_err {
                ParseError::UnexpectedToken { found, .. } => Some(found.span),
                ParseError::UnexpectedEof(_) => None,
                ParseError::LexerError(lex_err) => Some(lex_err.span),
                ParseError::TooDeep { span, .. } => Some(*span),
            },
            Error::Eval(eval_err) => Some(eval_err.span()),
        }
    }
}
