use std::time::Duration;

use thiserror::Error;

use commander_events::BrokerError;

/// Failures of producing commands/events and of correlated calls.
///
/// Timeouts, publish failures and shutdown are separate variants so callers can
/// pick different recovery (retry vs. abort).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommanderError {
    /// The broker rejected a publish; reported as the broker reported it.
    #[error(transparent)]
    Publish(#[from] BrokerError),

    /// No correlated event arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The commander shut down while a reply was awaited.
    #[error("commander closed before a reply arrived")]
    Closed,

    #[error("subscribing to the broker failed: {0}")]
    Subscribe(#[source] BrokerError),

    #[error("closing the broker failed: {0}")]
    Close(#[source] BrokerError),
}
