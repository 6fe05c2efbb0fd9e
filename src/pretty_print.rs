use crate::{EnvError, Error, EvalError, ParseError};
use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};
use std::ops::Range;

const SOURCE_ID: &str = "input";

impl Error {
    /// Renders the error as an annotated excerpt of `input`, the command
    /// text that produced it. Output is plain text without colour codes.
    pub fn render(&self, input: &str) -> String {
        let range = match self.span() {
            Some(span) => span.to_range(),
            None => input.len()..input.len(),
        };
        let report = Report::build(ReportKind::Error, (SOURCE_ID, range.clone()))
            .with_config(
                Config::default()
                    .with_color(false)
                    .with_index_type(IndexType::Byte),
            )
            .with_code(self.kind())
            .with_message(self.to_string())
            .with_label(Label::new((SOURCE_ID, range.clone())).with_message(self.label(range)))
            .finish();

        let mut buffer = Vec::new();
        match report.write((SOURCE_ID, Source::from(input)), &mut buffer) {
            Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(_) => format!("{}: {}", self.kind(), self),
        }
    }

    fn label(&self, range: Range<usize>) -> String {
        match self {
            Error::Parse(parse_err) => match parse_err {
                ParseError::UnexpectedToken { expected, .. } => format!("expected {expected}"),
                ParseError::UnexpectedEof(expected) => {
                    format!("input ends at byte {}, expected {expected}", range.start)
                }
                ParseError::LexerError(lex_err) => lex_err.error.to_string(),
                ParseError::TooDeep { .. } => "nesting limit reached here".to_string(),
            },
            Error::Eval(eval_err) => match eval_err {
                EvalError::EnvError(EnvError::UnboundVariable(..)) => {
                    "this symbol is not defined in the current scope".to_string()
                }
                EvalError::EnvError(EnvError::ArityMismatch { .. })
                | EvalError::ArityMismatch { .. } => {
                    "called with the wrong number of arguments".to_string()
                }
                EvalError::NotAProcedure(sexpr, _) => {
                    format!("this {} cannot be called as a procedure", sexpr.type_name())
                }
                EvalError::TypeMismatch { found, .. } => {
                    format!("found {} here", found.type_name())
                }
                EvalError::InvalidSpecialForm(..) => {
                    "this special form is malformed or incomplete".to_string()
                }
                EvalError::Arithmetic(..) => "arithmetic failed here".to_string(),
                EvalError::DepthExceeded { .. } => "evaluation nested too deeply here".to_string(),
            },
        }
    }
}
