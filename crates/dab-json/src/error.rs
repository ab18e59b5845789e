//! Error types for the JSON value model.

use std::fmt;

use thiserror::Error;

/// What went wrong while scanning the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A `,` was expected between members or elements.
    MissingComma,
    /// A `:` was expected between a member name and its value.
    MissingColon,
    /// The input ended inside a quoted string.
    UnterminatedString,
    /// A value or bare member name could not be recognized.
    InvalidSymbol,
    /// A numeric literal could not be converted.
    InvalidNumber,
    /// Non-whitespace input remained after the top-level value.
    TrailingGarbage,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingComma => "missing comma",
            Self::MissingColon => "missing name/value separator",
            Self::UnterminatedString => "unterminated string",
            Self::InvalidSymbol => "invalid symbol",
            Self::InvalidNumber => "invalid number",
            Self::TrailingGarbage => "trailing garbage after value",
        };
        f.write_str(text)
    }
}

/// Parse failure with the byte offset at which it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} at byte {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

/// Access failure on an already-parsed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonError {
    /// A read accessor was used against a different variant.
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    /// A required object member is absent.
    #[error("missing member \"{0}\"")]
    MissingMember(String),

    /// An array index is past the end.
    #[error("index {index} out of bounds (len {len})")]
    OutOfBounds { index: usize, len: usize },
}
