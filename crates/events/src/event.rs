use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use commander_core::{EnvelopeId, PartitionKey};

use crate::command::Command;
use crate::envelope::Envelope;
use crate::error::DecodeError;
use crate::headers::{decode_key, Header, HeaderReader};
use crate::message::RawMessage;

/// Outcome carried by an event.
///
/// On the wire this is the boolean `acknowledged` header:
///
/// | Status  | `acknowledged` |
/// |---------|----------------|
/// | `Ok`    | `true`         |
/// | other   | `false`        |
///
/// Decoding `false` yields `Error`. New terminal states must keep this mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn is_acknowledged(self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn from_acknowledged(acknowledged: bool) -> Self {
        if acknowledged { Status::Ok } else { Status::Error }
    }
}

/// Fact produced as the result of a command (or of another event).
///
/// `parent` is the sole correlation field. `version` lets consumers pick the
/// payload schema they understand for a given `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    origin: String,
    parent: EnvelopeId,
    id: EnvelopeId,
    action: String,
    version: i32,
    status: Status,
    key: PartitionKey,
    headers: HashMap<String, String>,
    data: Vec<u8>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Headers an event must carry on the wire.
    pub const REQUIRED_HEADERS: &'static [Header] = &Header::ALL;

    /// Build an event caused by `parent`.
    pub fn new(
        parent: EnvelopeId,
        key: PartitionKey,
        action: impl Into<String>,
        version: i32,
        status: Status,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            origin: String::new(),
            parent,
            id: EnvelopeId::new(),
            action: action.into(),
            version,
            status,
            key,
            headers: HashMap::new(),
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn reply(command: &Command, action: String, version: i32, status: Status, data: Vec<u8>) -> Self {
        Self::new(command.id(), command.key(), action, version, status, data)
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn parent(&self) -> EnvelopeId {
        self.parent
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Decode an event from a raw broker message.
    ///
    /// Every protocol header is required: identifiers must parse, `acknowledged`
    /// must be a boolean and `version` an integer.
    pub fn populate(message: &RawMessage) -> Result<Self, DecodeError> {
        let headers = HeaderReader::new(message);
        headers.require(Self::REQUIRED_HEADERS)?;

        let key = decode_key(&message.key)?;
        let action = headers.text(Header::Action)?.to_string();
        let parent = headers.identifier(Header::Parent)?;
        let id = headers.identifier(Header::Id)?;
        let status = Status::from_acknowledged(headers.boolean(Header::Acknowledged)?);
        let version = headers.integer(Header::Version)?;

        Ok(Self {
            origin: message.stream.clone(),
            parent,
            id,
            action,
            version,
            status,
            key,
            headers: message.headers.clone(),
            data: message.payload.clone(),
            timestamp: message.timestamp,
        })
    }

    /// Encode this event for publication on `stream`.
    pub fn to_message(&self, stream: &str) -> RawMessage {
        let mut message = RawMessage::new(stream, self.key.to_string(), self.data.clone())
            .with_timestamp(self.timestamp);
        message.headers = self.headers.clone();

        message
            .with_header(Header::Action.name(), self.action.clone())
            .with_header(Header::Parent.name(), self.parent.to_string())
            .with_header(Header::Id.name(), self.id.to_string())
            .with_header(Header::Acknowledged.name(), self.status.is_acknowledged().to_string())
            .with_header(Header::Version.name(), self.version.to_string())
    }
}

impl Envelope for Event {
    fn populate(message: &RawMessage) -> Result<Self, DecodeError> {
        Event::populate(message)
    }

    fn action(&self) -> &str {
        &self.action
    }

    fn version(&self) -> Option<i32> {
        Some(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_event() -> Event {
        Command::new("create", b"{}".to_vec()).new_event("created", 2, b"{\"ok\":true}".to_vec())
    }

    #[test]
    fn populate_reads_every_header() {
        let event = sample_event();
        let decoded = Event::populate(&event.to_message("events")).unwrap();

        assert_eq!(decoded.parent(), event.parent());
        assert_eq!(decoded.id(), event.id());
        assert_eq!(decoded.key(), event.key());
        assert_eq!(decoded.version(), 2);
        assert_eq!(decoded.status(), Status::Ok);
        assert_eq!(decoded.origin(), "events");
        assert_eq!(decoded.data(), b"{\"ok\":true}");
    }

    #[test]
    fn error_status_travels_as_unacknowledged() {
        let event = Command::new("create", Vec::new()).new_error("failed", "boom");
        let message = event.to_message("events");

        assert_eq!(message.header("acknowledged"), Some("false"));
        assert_eq!(Event::populate(&message).unwrap().status(), Status::Error);
    }

    #[test]
    fn malformed_version_fails() {
        let message = sample_event().to_message("events").with_header("version", "two");
        assert!(matches!(
            Event::populate(&message),
            Err(DecodeError::InvalidInteger { header: Header::Version, .. })
        ));
    }

    #[test]
    fn malformed_acknowledged_fails() {
        let message = sample_event().to_message("events").with_header("acknowledged", "maybe");
        assert!(matches!(
            Event::populate(&message),
            Err(DecodeError::InvalidBoolean { header: Header::Acknowledged, .. })
        ));
    }

    #[test]
    fn invalid_parent_fails() {
        let message = sample_event().to_message("events").with_header("parent", "nope");
        assert!(matches!(
            Event::populate(&message),
            Err(DecodeError::InvalidIdentifier { header: Header::Parent, .. })
        ));
    }

    #[test]
    fn missing_parent_fails() {
        let mut message = sample_event().to_message("events");
        message.headers.remove("parent");
        assert_eq!(
            Event::populate(&message),
            Err(DecodeError::MissingHeader(Header::Parent))
        );
    }

    #[test]
    fn json_payload_decodes() {
        let value: serde_json::Value = sample_event().json().unwrap();
        assert_eq!(value["ok"], true);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a reply keeps its correlation fields through the wire.
        #[test]
        fn replies_survive_the_wire(
            action in "[a-z][a-z._]{0,23}",
            version in any::<i32>(),
            acknowledged in any::<bool>(),
            data in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let command = Command::new("request", Vec::new());
            let event = if acknowledged {
                command.new_event(action.clone(), version, data.clone())
            } else {
                Event::new(command.id(), command.key(), action.clone(), version, Status::Error, data.clone())
            };

            let decoded = Event::populate(&event.to_message("events")).unwrap();

            prop_assert_eq!(decoded.parent(), command.id());
            prop_assert_eq!(decoded.action(), action.as_str());
            prop_assert_eq!(decoded.version(), version);
            prop_assert_eq!(decoded.status().is_acknowledged(), acknowledged);
            prop_assert_eq!(decoded.data(), data.as_slice());
        }
    }
}
