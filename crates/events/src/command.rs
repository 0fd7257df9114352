use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commander_core::{EnvelopeId, PartitionKey};

use crate::envelope::Envelope;
use crate::error::DecodeError;
use crate::event::{Event, Status};
use crate::headers::{decode_key, Header, HeaderReader};
use crate::message::RawMessage;

/// A request for some handler to perform `action`.
///
/// Commands are:
/// - **immutable** once built or decoded (fields are only readable)
/// - **identified** by an `id` generated once at construction
/// - **correlated** with their results through `Event::parent`
///
/// The builder methods (`with_key`, `with_origin`, `with_header`) consume the
/// command and are meant for use before it is handed to a producer. None of them
/// can touch the `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    origin: String,
    key: PartitionKey,
    id: EnvelopeId,
    action: String,
    headers: HashMap<String, String>,
    data: Vec<u8>,
    timestamp: DateTime<Utc>,
}

impl Command {
    /// Headers a command must carry on the wire.
    pub const REQUIRED_HEADERS: &'static [Header] = &[Header::Action, Header::Id];

    /// Build a command with a fresh id and partition key.
    pub fn new(action: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: String::new(),
            key: PartitionKey::new(),
            id: EnvelopeId::new(),
            action: action.into(),
            headers: HashMap::new(),
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build a command whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(
        action: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(action, serde_json::to_vec(value)?))
    }

    /// Pin the partition key (e.g. to keep all commands of one entity together).
    pub fn with_key(mut self, key: PartitionKey) -> Self {
        self.key = key;
        self
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

    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn action(&self) -> &str {
        &self.action
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

    /// Build the successful result of this command.
    pub fn new_event(&self, action: impl Into<String>, version: i32, data: impl Into<Vec<u8>>) -> Event {
        Event::reply(self, action.into(), version, Status::Ok, data.into())
    }

    /// Build the failed result of this command.
    ///
    /// The error's message becomes the event payload; nothing is raised.
    pub fn new_error(&self, action: impl Into<String>, err: impl core::fmt::Display) -> Event {
        Event::reply(self, action.into(), 0, Status::Error, err.to_string().into_bytes())
    }

    /// Decode a command from a raw broker message.
    ///
    /// Fails when the message key is empty or not an identifier, when the id
    /// header is absent, empty or invalid, or when the action header is absent
    /// or empty. A command is only returned when every field decoded.
    pub fn populate(message: &RawMessage) -> Result<Self, DecodeError> {
        let headers = HeaderReader::new(message);
        headers.require(Self::REQUIRED_HEADERS)?;

        let key = decode_key(&message.key)?;
        let id = headers.identifier(Header::Id)?;
        let action = headers.text(Header::Action)?.to_string();

        Ok(Self {
            origin: message.stream.clone(),
            key,
            id,
            action,
            headers: message.headers.clone(),
            data: message.payload.clone(),
            timestamp: message.timestamp,
        })
    }

    /// Encode this command for publication on `stream`.
    ///
    /// Custom headers travel along; the protocol headers always win.
    pub fn to_message(&self, stream: &str) -> RawMessage {
        let mut message = RawMessage::new(stream, self.key.to_string(), self.data.clone())
            .with_timestamp(self.timestamp);
        message.headers = self.headers.clone();

        message
            .with_header(Header::Action.name(), self.action.clone())
            .with_header(Header::Id.name(), self.id.to_string())
    }
}

impl Envelope for Command {
    fn populate(message: &RawMessage) -> Result<Self, DecodeError> {
        Command::populate(message)
    }

    fn action(&self) -> &str {
        &self.action
    }
}
