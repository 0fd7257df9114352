//! `commander-events` — the envelope model and the broker boundary.
//!
//! - [`Command`] / [`Event`]: immutable envelopes and their wire encoding
//! - [`Broker`]: the narrow transport contract the rest of the system depends on
//! - [`InMemoryBroker`]: transport for tests and local development

pub mod bus;
pub mod command;
pub mod envelope;
pub mod error;
pub mod event;
pub mod headers;
pub mod in_memory_bus;
pub mod message;

pub use bus::{Broker, MessageStream};
pub use command::Command;
pub use envelope::Envelope;
pub use error::{BrokerError, DecodeError};
pub use event::{Event, Status};
pub use headers::Header;
pub use in_memory_bus::InMemoryBroker;
pub use message::RawMessage;

pub use commander_core::{EnvelopeId, PartitionKey};
