//! Identifier error model.

use thiserror::Error;

/// Failure to read a 128-bit identifier from its textual form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Nothing was supplied.
    #[error("{0} is empty")]
    Empty(&'static str),

    /// The text is not a UUID.
    #[error("{kind} is malformed: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// The nil UUID is never a valid identifier.
    #[error("{0} is the nil uuid")]
    Nil(&'static str),
}
