//! Compiler error types.
//!
//! Every phase reports failures as a [`PicoError`]: an error kind, a
//! human-readable message, and the token the error originated from. The
//! driver uses the origin token to render a caret-underlined source line
//! (see [`crate::diagnostics`]).

use crate::token::Token;

/// Which phase of the pipeline rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tokenizer errors: unknown character, bad escape, unterminated string.
    Lex,
    /// Parser errors: expected-token mismatch, invalid declaration or primary.
    Syntax,
    /// Semantic errors: resolution, typing, linkage.
    Semantic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Lex => write!(f, "lex error"),
            ErrorKind::Syntax => write!(f, "syntax error"),
            ErrorKind::Semantic => write!(f, "semantic error"),
        }
    }
}

/// A fatal compilation error.
///
/// All errors abort the current phase; there are no warnings and no
/// recovery. The first error wins.
#[derive(Debug, Clone)]
pub struct PicoError {
    pub kind: ErrorKind,
    pub message: String,
    /// The token the error points at. For lex errors this is a synthetic
    /// token covering the offending input bytes.
    pub origin: Token,
}

impl PicoError {
    pub fn lex(message: impl Into<String>, origin: Token) -> Self {
        PicoError {
            kind: ErrorKind::Lex,
            message: message.into(),
            origin,
        }
    }

    pub fn syntax(message: impl Into<String>, origin: Token) -> Self {
        PicoError {
            kind: ErrorKind::Syntax,
            message: message.into(),
            origin,
        }
    }

    pub fn semantic(message: impl Into<String>, origin: Token) -> Self {
        PicoError {
            kind: ErrorKind::Semantic,
            message: message.into(),
            origin,
        }
    }
}

impl std::fmt::Display for PicoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (line {}, col {})",
            self.kind, self.message, self.origin.loc.line, self.origin.loc.col
        )
    }
}

impl std::error::Error for PicoError {}
