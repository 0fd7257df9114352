//! Many logical subscriptions over one physical broker consumer.
//!
//! ```text
//!                        ┌─► route(stream A) ─► worker ─► bounded delivery ─► Subscription
//! broker ─► fan-out loop ┼─► route(stream B) ─► worker ─► bounded delivery ─► Subscription
//!                        └─► route(ANY)      ─► worker ─► bounded delivery ─► Subscription
//! ```
//!
//! Every route has its own unbounded inbound queue drained by its own worker, so
//! a subscriber that stops reading only backs up its own queue. Order is kept per
//! subscription. Closing (the shared token or one subscription's token) wins over
//! a pending delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use commander_events::{MessageStream, RawMessage};
use commander_observability::CommanderMetrics;

/// Stream name matching messages from every stream.
pub const ANY_STREAM: &str = "";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Cloneable reference to a subscription, used to cancel it.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    stream: String,
    closing: CancellationToken,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Whether the subscription was cancelled (or the multiplexer closed).
    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }
}

/// Receiving end of one logical subscription.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    messages: mpsc::Receiver<RawMessage>,
}

impl Subscription {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Next message, or `None` once the subscription is cancelled or the
    /// multiplexer shut down. Never yields after cancellation was observed.
    pub async fn recv(&mut self) -> Option<RawMessage> {
        tokio::select! {
            biased;
            _ = self.handle.closing.cancelled() => None,
            message = self.messages.recv() => message,
        }
    }
}

#[derive(Debug)]
struct Route {
    stream: String,
    inbound: mpsc::UnboundedSender<RawMessage>,
}

impl Route {
    fn matches(&self, stream: &str) -> bool {
        self.stream == ANY_STREAM || self.stream == stream
    }
}

#[derive(Debug)]
struct Shared {
    routes: Mutex<HashMap<SubscriptionId, Route>>,
    /// Set (under the `routes` lock) once the fan-out loop has exited.
    stopped: AtomicBool,
    next_id: AtomicU64,
    closing: CancellationToken,
    tracker: TaskTracker,
    capacity: usize,
    metrics: Arc<CommanderMetrics>,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl Multiplexer {
    /// Start fanning out `source` until `closing` is cancelled or the source ends.
    ///
    /// The fan-out loop and every delivery worker are spawned on `tracker`.
    pub fn start(
        source: MessageStream,
        closing: CancellationToken,
        tracker: TaskTracker,
        capacity: usize,
        metrics: Arc<CommanderMetrics>,
    ) -> Self {
        let multiplexer = Self {
            shared: Arc::new(Shared {
                routes: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                closing,
                tracker,
                capacity: capacity.max(1),
                metrics,
            }),
        };

        let fan_out = multiplexer.clone();
        multiplexer.shared.tracker.spawn(fan_out.run(source));

        multiplexer
    }

    /// Open a logical subscription on `stream` (or [`ANY_STREAM`]).
    ///
    /// Matching messages queue up until read: a subscription that is held but
    /// never read buffers without limit. Drop or unsubscribe it when done.
    ///
    /// Once the fan-out loop has stopped the subscription is born closed and
    /// `recv` returns `None` straight away.
    pub fn subscribe(&self, stream: impl Into<String>) -> Subscription {
        let stream = stream.into();
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let closing = self.shared.closing.child_token();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::channel(self.shared.capacity);

        {
            let mut routes = self.shared.routes();
            if self.shared.stopped.load(Ordering::SeqCst) {
                // Dropping `inbound_tx` ends the worker at once.
                debug!(subscription = %id, %stream, "fan-out stopped, subscription closed");
            } else {
                routes.insert(
                    id,
                    Route {
                        stream: stream.clone(),
                        inbound: inbound_tx,
                    },
                );
            }
        }
        self.shared.tracker.spawn(deliver(
            Arc::downgrade(&self.shared),
            id,
            inbound_rx,
            delivery_tx,
            closing.clone(),
        ));

        debug!(subscription = %id, %stream, "subscribed");

        Subscription {
            handle: SubscriptionHandle { id, stream, closing },
            messages: delivery_rx,
        }
    }

    /// Cancel a subscription. Returns `false` if it was already cancelled.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let was_open = !handle.closing.is_cancelled();
        handle.closing.cancel();
        self.shared.routes().remove(&handle.id);

        if was_open {
            debug!(subscription = %handle.id, stream = %handle.stream, "unsubscribed");
        } else {
            debug!(subscription = %handle.id, "subscription already closed");
        }
        was_open
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.routes().len()
    }

    async fn run(self, mut source: MessageStream) {
        loop {
            tokio::select! {
                biased;
                _ = self.shared.closing.cancelled() => break,
                message = source.recv() => match message {
                    Some(message) => self.route(message),
                    None => {
                        debug!("broker stream ended");
                        break;
                    }
                },
            }
        }

        // Dropping the inbound senders ends every worker; later subscriptions
        // see `stopped` under the same lock.
        let mut routes = self.shared.routes();
        self.shared.stopped.store(true, Ordering::SeqCst);
        routes.clear();
        drop(routes);
        debug!("fan-out stopped");
    }

    fn route(&self, message: RawMessage) {
        let mut matched = 0usize;

        self.shared.routes().retain(|_, route| {
            if !route.matches(&message.stream) {
                return true;
            }
            matched += 1;
            // Fails only once the worker is gone.
            route.inbound.send(message.clone()).is_ok()
        });

        if matched == 0 {
            self.shared.metrics.unrouted();
            trace!(stream = %message.stream, "no subscription for message");
        }
    }
}

async fn deliver(
    shared: Weak<Shared>,
    id: SubscriptionId,
    mut inbound: mpsc::UnboundedReceiver<RawMessage>,
    delivery: mpsc::Sender<RawMessage>,
    closing: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            sent = delivery.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    drop(delivery);
    if let Some(shared) = shared.upgrade() {
        shared.routes().remove(&id);
    }
    trace!(subscription = %id, "delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Fixture {
        source: mpsc::UnboundedSender<RawMessage>,
        closing: CancellationToken,
        tracker: TaskTracker,
        metrics: Arc<CommanderMetrics>,
        multiplexer: Multiplexer,
    }

    fn fixture(capacity: usize) -> Fixture {
        let (source, stream) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let tracker = TaskTracker::new();
        let metrics = Arc::new(CommanderMetrics::new());
        let multiplexer = Multiplexer::start(
            stream,
            closing.clone(),
            tracker.clone(),
            capacity,
            metrics.clone(),
        );
        Fixture {
            source,
            closing,
            tracker,
            metrics,
            multiplexer,
        }
    }

    fn message(stream: &str, payload: &str) -> RawMessage {
        RawMessage::new(stream, b"key".to_vec(), payload.as_bytes().to_vec())
    }

    async fn next(subscription: &mut Subscription) -> Option<RawMessage> {
        tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("timed out waiting for message")
    }

    #[tokio::test]
    async fn fans_out_to_matching_subscriptions() {
        let f = fixture(8);
        let mut commands = f.multiplexer.subscribe("commands");
        let mut also_commands = f.multiplexer.subscribe("commands");
        let mut events = f.multiplexer.subscribe("events");
        let mut any = f.multiplexer.subscribe(ANY_STREAM);

        f.source.send(message("commands", "c1")).unwrap();
        f.source.send(message("events", "e1")).unwrap();

        assert_eq!(next(&mut commands).await.unwrap().payload, b"c1");
        assert_eq!(next(&mut also_commands).await.unwrap().payload, b"c1");
        assert_eq!(next(&mut events).await.unwrap().payload, b"e1");
        assert_eq!(next(&mut any).await.unwrap().payload, b"c1");
        assert_eq!(next(&mut any).await.unwrap().payload, b"e1");
    }

    #[tokio::test]
    async fn keeps_order_per_subscription() {
        let f = fixture(2);
        let mut subscription = f.multiplexer.subscribe("events");

        for i in 0..20 {
            f.source.send(message("events", &i.to_string())).unwrap();
        }
        for i in 0..20 {
            let received = next(&mut subscription).await.unwrap();
            assert_eq!(received.payload, i.to_string().into_bytes());
        }
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_block_others() {
        let f = fixture(1);
        let _stalled = f.multiplexer.subscribe("events");
        let mut reader = f.multiplexer.subscribe("events");

        for i in 0..10 {
            f.source.send(message("events", &i.to_string())).unwrap();
        }
        for i in 0..10 {
            let received = next(&mut reader).await.unwrap();
            assert_eq!(received.payload, i.to_string().into_bytes());
        }
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_subscription() {
        let f = fixture(8);
        let mut subscription = f.multiplexer.subscribe("events");
        let handle = subscription.handle().clone();

        assert!(f.multiplexer.unsubscribe(&handle));
        assert!(handle.is_closed());

        f.source.send(message("events", "late")).unwrap();
        assert!(next(&mut subscription).await.is_none());

        assert!(!f.multiplexer.unsubscribe(&handle));
        assert_eq!(f.multiplexer.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn unmatched_messages_are_counted() {
        let f = fixture(8);
        let mut events = f.multiplexer.subscribe("events");

        f.source.send(message("audit", "dropped")).unwrap();
        f.source.send(message("events", "kept")).unwrap();

        assert_eq!(next(&mut events).await.unwrap().payload, b"kept");
        assert_eq!(f.metrics.snapshot().unrouted, 1);
    }

    #[tokio::test]
    async fn closing_ends_all_subscriptions_and_tasks() {
        let f = fixture(8);
        let mut first = f.multiplexer.subscribe("commands");
        let mut second = f.multiplexer.subscribe(ANY_STREAM);

        f.closing.cancel();
        f.tracker.close();
        tokio::time::timeout(Duration::from_secs(1), f.tracker.wait())
            .await
            .unwrap();

        assert!(next(&mut first).await.is_none());
        assert!(next(&mut second).await.is_none());
        assert_eq!(f.multiplexer.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn subscriptions_after_source_end_are_closed() {
        let f = fixture(8);
        let mut earlier = f.multiplexer.subscribe("events");
        let handle = earlier.handle().clone();

        drop(f.source);
        assert!(next(&mut earlier).await.is_none());

        let mut later = f.multiplexer.subscribe("events");
        assert!(next(&mut later).await.is_none());
        assert_eq!(f.multiplexer.active_subscriptions(), 0);

        // The route is already gone, but the handle was never cancelled.
        assert!(f.multiplexer.unsubscribe(&handle));
        assert!(!f.multiplexer.unsubscribe(&handle));
    }

    #[tokio::test]
    async fn source_ending_closes_subscriptions() {
        let f = fixture(8);
        let mut subscription = f.multiplexer.subscribe("events");

        drop(f.source);
        assert!(next(&mut subscription).await.is_none());
    }
}
