use thiserror::Error;

use commander_core::IdError;

use crate::headers::Header;

/// Why a raw message could not be decoded into an envelope.
///
/// Any of these means the message is unusable as a whole.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message key is empty")]
    MissingKey,

    #[error("message key is not a valid partition key: {0}")]
    InvalidKey(#[source] IdError),

    #[error("header `{0}` is missing or empty")]
    MissingHeader(Header),

    #[error("header `{header}` is not a valid identifier: {source}")]
    InvalidIdentifier {
        header: Header,
        #[source]
        source: IdError,
    },

    #[error("header `{header}` is not a boolean: {value:?}")]
    InvalidBoolean { header: Header, value: String },

    #[error("header `{header}` is not an integer: {value:?}")]
    InvalidInteger { header: Header, value: String },
}

/// Failure reported by a broker adapter.
///
/// Publish failures are handed to callers unchanged; this layer never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker was closed; no further publish or subscribe is valid.
    #[error("broker is closed")]
    Closed,

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    /// The broker returned something this adapter cannot interpret.
    #[error("broker protocol error: {0}")]
    Protocol(String),
}
