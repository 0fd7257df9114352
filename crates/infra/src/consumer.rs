use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{trace, warn};

use commander_events::Envelope;
use commander_observability::CommanderMetrics;

use crate::filter::Filter;
use crate::multiplexer::{Multiplexer, Subscription, SubscriptionHandle};

/// Typed view over a subscription: decodes raw messages into `T` and drops
/// everything the [`Filter`] rejects.
///
/// Dropping the consumer releases its subscription.
///
/// Messages for a consumer queue up until it reads them; one that is held but
/// never read buffers every matching message without limit.
#[derive(Debug)]
pub struct Consumer<T> {
    subscription: Subscription,
    multiplexer: Multiplexer,
    filter: Filter,
    metrics: Arc<CommanderMetrics>,
    _envelope: PhantomData<fn() -> T>,
}

impl<T: Envelope> Consumer<T> {
    pub(crate) fn new(
        multiplexer: Multiplexer,
        stream: impl Into<String>,
        filter: Filter,
        metrics: Arc<CommanderMetrics>,
    ) -> Self {
        Self {
            subscription: multiplexer.subscribe(stream),
            multiplexer,
            filter,
            metrics,
            _envelope: PhantomData,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle().clone()
    }

    /// Next accepted envelope, or `None` once the subscription closed.
    ///
    /// Messages that fail to decode are logged and skipped; they never end the
    /// consumer.
    pub async fn recv(&mut self) -> Option<T> {
        while let Some(message) = self.subscription.recv().await {
            if !self.filter.accepts_raw(&message) {
                self.metrics.filtered_out();
                continue;
            }

            let envelope = match T::populate(&message) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.metrics.decode_failure();
                    warn!(stream = %message.stream, error = %e, "rejecting undecodable message");
                    continue;
                }
            };

            if !self.filter.accepts(&envelope) {
                self.metrics.filtered_out();
                trace!(action = envelope.action(), version = ?envelope.version(), "envelope filtered out");
                continue;
            }

            self.metrics.delivered();
            return Some(envelope);
        }

        None
    }

    /// Release the subscription now instead of on drop.
    pub fn close(&self) {
        self.multiplexer.unsubscribe(self.subscription.handle());
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        if !self.subscription.handle().is_closed() {
            self.multiplexer.unsubscribe(self.subscription.handle());
        }
    }
}
