use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// A message as it crosses the broker boundary: stream name, key bytes,
/// string headers and an uninterpreted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub stream: String,
    pub key: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
    /// Producer time when encoded locally, broker time when received.
    pub timestamp: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(stream: impl Into<String>, key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: stream.into(),
            key: key.into(),
            headers: HashMap::new(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
