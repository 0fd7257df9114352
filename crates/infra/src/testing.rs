//! Helpers for tests of code built on the commander.

use std::sync::Arc;
use std::time::Duration;

use commander_events::{InMemoryBroker, RawMessage};

use crate::commander::Commander;
use crate::config::CommanderConfig;
use crate::error::CommanderError;

/// Short timeouts and small buffers, for tests.
pub fn mock_config() -> CommanderConfig {
    CommanderConfig::default()
        .with_consumer_group("testing")
        .with_timeout(Duration::from_secs(1))
        .with_delivery_capacity(8)
}

/// A commander connected to a fresh [`InMemoryBroker`], plus the broker itself
/// for injecting raw messages and inspecting what was published.
pub async fn mock_commander() -> Result<(Commander<Arc<InMemoryBroker>>, Arc<InMemoryBroker>), CommanderError> {
    let broker = Arc::new(InMemoryBroker::new());
    let commander = Commander::connect(broker.clone(), mock_config()).await?;
    Ok((commander, broker))
}

/// A raw command message with explicit key, id and action, valid or not.
pub fn mock_command_message(stream: &str, action: &str, key: &str, id: &str, payload: &[u8]) -> RawMessage {
    RawMessage::new(stream, key.as_bytes().to_vec(), payload.to_vec())
        .with_header(commander_events::headers::ACTION_HEADER, action)
        .with_header(commander_events::headers::ID_HEADER, id)
}
