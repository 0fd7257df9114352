//! Strongly-typed 128-bit identifiers carried by envelopes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

/// Identity of a single command or event instance.
///
/// An event's `parent` is the `EnvelopeId` of whatever caused it; this is the
/// only field used to correlate a reply with its request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Uuid);

/// Partition/correlation key, written as the broker message key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Generate a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse the textual wire form.
            ///
            /// Empty input and the nil UUID are rejected: a missing identifier must
            /// never decode into a zeroed value.
            pub fn parse(s: &str) -> Result<Self, IdError> {
                if s.is_empty() {
                    return Err(IdError::Empty($name));
                }

                let uuid = Uuid::from_str(s).map_err(|e| IdError::Malformed {
                    kind: $name,
                    reason: e.to_string(),
                })?;

                if uuid.is_nil() {
                    return Err(IdError::Nil($name));
                }

                Ok(Self(uuid))
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_uuid_newtype!(EnvelopeId, "EnvelopeId");
impl_uuid_newtype!(PartitionKey, "PartitionKey");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_are_inverse() {
        let id = EnvelopeId::new();
        let parsed: EnvelopeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(PartitionKey::parse(""), Err(IdError::Empty("PartitionKey")));
    }

    #[test]
    fn nil_uuid_is_rejected() {
        let nil = Uuid::nil().to_string();
        assert_eq!(EnvelopeId::parse(&nil), Err(IdError::Nil("EnvelopeId")));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = EnvelopeId::parse("not-a-uuid").unwrap_err();
        assert!(matches!(err, IdError::Malformed { kind: "EnvelopeId", .. }));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(EnvelopeId::new(), EnvelopeId::new());
    }
}
