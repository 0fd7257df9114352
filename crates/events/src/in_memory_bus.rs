//! In-memory broker for tests/dev.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{Broker, MessageStream};
use crate::error::BrokerError;
use crate::message::RawMessage;

#[derive(Debug)]
struct Subscriber {
    streams: Vec<String>,
    sender: mpsc::UnboundedSender<RawMessage>,
}

/// In-memory pub/sub broker.
///
/// - No IO
/// - Every `subscribe` call receives every message of its streams (groups are not load-balanced)
/// - Publish order is delivery order
/// - Keeps a copy of everything published, for assertions
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    subscribers: Mutex<Vec<Subscriber>>,
    published: Mutex<Vec<RawMessage>>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<RawMessage> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, message: RawMessage) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| BrokerError::Command("subscriber lock poisoned".to_string()))?;

        // Drop any dead subscribers while publishing.
        subs.retain(|sub| {
            !sub.streams.contains(&message.stream) || sub.sender.send(message.clone()).is_ok()
        });
        drop(subs);

        if let Ok(mut published) = self.published.lock() {
            published.push(message);
        }

        Ok(())
    }

    async fn subscribe(&self, _group: &str, streams: &[String]) -> Result<MessageStream, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| BrokerError::Command("subscriber lock poisoned".to_string()))?
            .push(Subscriber {
                streams: streams.to_vec(),
                sender,
            });

        Ok(receiver)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the senders ends every message stream.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.clear();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(stream: &str) -> RawMessage {
        RawMessage::new(stream, b"key".to_vec(), b"payload".to_vec())
    }

    #[tokio::test]
    async fn delivers_only_subscribed_streams() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("group", &["events".to_string()]).await.unwrap();

        broker.publish(message("commands")).await.unwrap();
        broker.publish(message("events")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().stream, "events");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let broker = InMemoryBroker::new();
        let streams = vec!["events".to_string()];
        let mut a = broker.subscribe("group", &streams).await.unwrap();
        let mut b = broker.subscribe("group", &streams).await.unwrap();

        broker.publish(message("events")).await.unwrap();

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_publish() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("group", &["events".to_string()]).await.unwrap();

        broker.close().await.unwrap();

        assert!(rx.recv().await.is_none());
        assert_eq!(broker.publish(message("events")).await, Err(BrokerError::Closed));
        assert!(broker.subscribe("group", &[]).await.is_err());
    }
}
