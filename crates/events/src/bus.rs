//! Broker adapter abstraction (mechanics only).
//!
//! The core talks to the physical message broker through the narrow [`Broker`]
//! contract below. Everything else (connections, consumer-group rebalancing,
//! how keys and headers are laid out inside the broker) stays behind it.
//!
//! ## Delivery Semantics
//!
//! - **At-least-once**: a message may be delivered more than once; consumers must tolerate duplicates
//! - **Per-stream order**: messages of one stream are yielded in the order the broker stores them
//! - **No cross-partition order**: partitioned brokers only order within a partition
//!
//! ## Error Handling
//!
//! `publish()` returns the broker's own failure as a [`BrokerError`]. Callers decide whether
//! to retry; adapters never retry on their behalf.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::message::RawMessage;

/// Continuous sequence of raw messages from the streams a group subscribed to.
///
/// The sequence ends when the broker is closed.
pub type MessageStream = mpsc::UnboundedReceiver<RawMessage>;

/// Durable publish/subscribe transport.
///
/// ## Architecture Role
///
/// ```text
/// Commander ──publish──► Broker ──subscribe──► Multiplexer ──► Consumers
/// ```
///
/// One `Broker` value is shared by every producer call and by the single
/// physical consumer that feeds the multiplexer.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; publishes may happen concurrently from
/// many tasks. `close()` must be called at most once, after every other use.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish one message and wait for the broker's acknowledgement.
    async fn publish(&self, message: RawMessage) -> Result<(), BrokerError>;

    /// Join consumer `group` on `streams`.
    async fn subscribe(&self, group: &str, streams: &[String]) -> Result<MessageStream, BrokerError>;

    /// Release publisher and consumer-group resources.
    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    async fn publish(&self, message: RawMessage) -> Result<(), BrokerError> {
        (**self).publish(message).await
    }

    async fn subscribe(&self, group: &str, streams: &[String]) -> Result<MessageStream, BrokerError> {
        (**self).subscribe(group, streams).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}
