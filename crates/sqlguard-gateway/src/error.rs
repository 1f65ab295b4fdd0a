//! Error types for the gateway crate.

use thiserror::Error;

/// Errors raised while lexing SQL text into a normalized shape.
///
/// Any of these makes the text unclassifiable; the gateway treats it as
/// [`StatementKind::Unknown`](crate::StatementKind::Unknown).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// A string literal is never closed.
    #[error("unterminated string literal starting at byte {offset}")]
    UnterminatedString { offset: usize },

    /// A quoted identifier is never closed.
    #[error("unterminated quoted identifier starting at byte {offset}")]
    UnterminatedIdentifier { offset: usize },

    /// A dollar-quoted body is never closed.
    #[error("unterminated dollar-quoted string starting at byte {offset}")]
    UnterminatedDollarQuote { offset: usize },

    /// A block comment is never closed.
    #[error("unterminated block comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },

    /// The text contains a NUL byte, which Postgres never accepts.
    #[error("NUL byte at byte {offset}")]
    NulByte { offset: usize },

    /// A Unicode escape sequence in a `U&` literal is malformed.
    #[error("invalid unicode escape at byte {offset}")]
    InvalidUnicodeEscape { offset: usize },
}
