//! cellisp - a small Lisp dialect built on cons cells
//!
//! The crate has three tightly coupled parts:
//!
//! - `reader`: parses S-expression source text into a tree of [`node::Node`]
//!   values in which list structure is a chain of cons cells;
//! - `eval`: a tree-walking evaluator over those trees, with lexical
//!   environments, closures, quasiquotation and macros;
//! - `ops`: the fixed operator table of special forms and builtin functions
//!   that gives the evaluator its vocabulary.
//!
//! Parsed source and runtime values share one representation, so `quote`,
//! `eval` and macros are structural no-ops rather than conversions:
//!
//! ```
//! use cellisp::{env::Env, eval, reader, stdlib};
//!
//! let root = Env::root();
//! stdlib::load_stdlib(&root).unwrap();
//! let program = reader::parse_program("(defun sq (n) (* n n)) (sq 7)").unwrap();
//! let result = eval::eval_program(&root, &program).unwrap();
//! assert_eq!(result.to_string(), "49");
//! ```

use std::fmt;

/// Categorizes reader failures.
///
/// `Eof` is recoverable: it means the input ended in the middle of a form,
/// and a REPL should request another line rather than report an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A character that cannot start any token.
    InvalidToken,
    /// Input ended inside a form (unterminated list or string).
    Eof,
}

/// A reader failure with the byte position where it occurred.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset into the source where the failure was detected.
    pub position: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, message: impl Into<String>, position: usize) -> Self {
        ParseError {
            kind,
            message: message.into(),
            position,
        }
    }

    /// True when more input could turn this failure into a successful parse.
    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Eof
    }
}

/// Error type shared by the reader, the evaluator and the operator table.
///
/// Every evaluation returns either a value or one of these; errors propagate
/// unchanged to the outer driver (REPL or main). There is no implicit catch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("undefined symbol: {0}")]
    UndefinedSymbol(String),
    #[error("invalid op: {0}")]
    InvalidOp(String),
    #[error("invalid arguments for {0}")]
    InvalidArguments(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for the `InvalidArguments` variant, which every operator
    /// uses to report a bad arity or operand type under its own name.
    pub(crate) fn invalid_args(op: impl fmt::Display) -> Error {
        Error::InvalidArguments(op.to_string())
    }
}

pub mod env;
pub mod eval;
pub mod node;
pub mod ops;
pub mod reader;
pub mod stdlib;
