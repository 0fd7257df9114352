//! Wire header contract.
//!
//! Header names are part of the cross-process protocol and must match exactly.
//! Decoding goes through an explicit mapping from [`Header`] to a typed reader;
//! each envelope type declares the fixed set of headers it requires.

use commander_core::{EnvelopeId, IdError};

use crate::error::DecodeError;
use crate::message::RawMessage;

pub const ACTION_HEADER: &str = "action";
pub const PARENT_HEADER: &str = "parent";
/// The envelope id travels under the `key` header; the message key itself is the partition key.
pub const ID_HEADER: &str = "key";
pub const ACKNOWLEDGED_HEADER: &str = "acknowledged";
pub const VERSION_HEADER: &str = "version";

/// Headers the envelope model knows how to read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Header {
    Action,
    Parent,
    Id,
    Acknowledged,
    Version,
}

impl Header {
    pub const ALL: [Header; 5] = [
        Header::Action,
        Header::Parent,
        Header::Id,
        Header::Acknowledged,
        Header::Version,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Header::Action => ACTION_HEADER,
            Header::Parent => PARENT_HEADER,
            Header::Id => ID_HEADER,
            Header::Acknowledged => ACKNOWLEDGED_HEADER,
            Header::Version => VERSION_HEADER,
        }
    }

    pub fn from_name(name: &str) -> Option<Header> {
        Header::ALL.into_iter().find(|h| h.name() == name)
    }
}

impl core::fmt::Display for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed, read-only view over the headers of one raw message.
pub(crate) struct HeaderReader<'a> {
    message: &'a RawMessage,
}

impl<'a> HeaderReader<'a> {
    pub(crate) fn new(message: &'a RawMessage) -> Self {
        Self { message }
    }

    /// Fail on the first required header that is absent or empty.
    pub(crate) fn require(&self, required: &[Header]) -> Result<(), DecodeError> {
        match required.iter().find(|h| self.raw(**h).is_none()) {
            Some(missing) => Err(DecodeError::MissingHeader(*missing)),
            None => Ok(()),
        }
    }

    pub(crate) fn text(&self, header: Header) -> Result<&'a str, DecodeError> {
        self.raw(header).ok_or(DecodeError::MissingHeader(header))
    }

    pub(crate) fn identifier(&self, header: Header) -> Result<EnvelopeId, DecodeError> {
        let value = self.text(header)?;
        EnvelopeId::parse(value).map_err(|source| DecodeError::InvalidIdentifier { header, source })
    }

    pub(crate) fn boolean(&self, header: Header) -> Result<bool, DecodeError> {
        let value = self.text(header)?;
        parse_bool(value).ok_or_else(|| DecodeError::InvalidBoolean {
            header,
            value: value.to_string(),
        })
    }

    pub(crate) fn integer(&self, header: Header) -> Result<i32, DecodeError> {
        let value = self.text(header)?;
        value.trim().parse::<i32>().map_err(|_| DecodeError::InvalidInteger {
            header,
            value: value.to_string(),
        })
    }

    fn raw(&self, header: Header) -> Option<&'a str> {
        self.message
            .headers
            .get(header.name())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Boolean spellings accepted from producers written in other languages.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Read the partition key carried as the message key.
pub(crate) fn decode_key(key: &[u8]) -> Result<commander_core::PartitionKey, DecodeError> {
    if key.is_empty() {
        return Err(DecodeError::MissingKey);
    }

    let text = core::str::from_utf8(key).map_err(|e| {
        DecodeError::InvalidKey(IdError::Malformed {
            kind: "PartitionKey",
            reason: e.to_string(),
        })
    })?;

    commander_core::PartitionKey::parse(text).map_err(DecodeError::InvalidKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_lookup() {
        for header in Header::ALL {
            assert_eq!(Header::from_name(header.name()), Some(header));
        }
        assert_eq!(Header::from_name("unknown"), None);
    }

    #[test]
    fn id_header_is_named_key() {
        assert_eq!(Header::Id.name(), "key");
    }

    #[test]
    fn empty_header_counts_as_missing() {
        let message = RawMessage::new("s", b"k".to_vec(), Vec::new()).with_header("action", "");
        let reader = HeaderReader::new(&message);
        assert_eq!(
            reader.require(&[Header::Action]),
            Err(DecodeError::MissingHeader(Header::Action))
        );
    }

    #[test]
    fn go_style_booleans_are_accepted() {
        assert_eq!(parse_bool("T"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn key_must_be_utf8_uuid() {
        assert_eq!(decode_key(b""), Err(DecodeError::MissingKey));
        assert!(matches!(decode_key(&[0xff, 0xfe]), Err(DecodeError::InvalidKey(_))));
        assert!(matches!(decode_key(b"nope"), Err(DecodeError::InvalidKey(_))));
    }
}
