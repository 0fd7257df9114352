//! The [`Commander`]: produce commands and events, consume them by action, and
//! correlate commands with the events that answer them.
//!
//! ## Request/reply
//!
//! ```text
//! sync_command(cmd)
//!   1. open an isolated events consumer        (before publishing, so no reply is missed)
//!   2. publish cmd on the command stream
//!   3. wait for the first event with parent == cmd.id, bounded by the timeout
//!   4. release the consumer                     (on every path)
//! ```
//!
//! Each call has its own subscription, so concurrent callers never see each
//! other's replies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use commander_events::{Broker, Command, Envelope, Event};
use commander_observability::{CommanderMetrics, MetricsSnapshot};

use crate::config::CommanderConfig;
use crate::consumer::Consumer;
use crate::error::CommanderError;
use crate::filter::Filter;
use crate::lifecycle::{self, Lifecycle};
use crate::multiplexer::{Multiplexer, SubscriptionHandle};

#[derive(Debug)]
struct Inner<B> {
    broker: B,
    config: CommanderConfig,
    lifecycle: Lifecycle,
    multiplexer: Multiplexer,
    metrics: Arc<CommanderMetrics>,
}

/// Handle to one connected commander. Cloning is cheap; clones share the broker,
/// the subscriptions and the lifecycle.
#[derive(Debug)]
pub struct Commander<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Commander<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Broker> Commander<B> {
    /// Join the configured consumer group and start multiplexing its streams.
    pub async fn connect(broker: B, config: CommanderConfig) -> Result<Self, CommanderError> {
        let lifecycle = Lifecycle::new();
        let metrics = Arc::new(CommanderMetrics::new());

        let streams = config.streams();
        let source = broker
            .subscribe(&config.consumer_group, &streams)
            .await
            .map_err(CommanderError::Subscribe)?;

        let multiplexer = Multiplexer::start(
            source,
            lifecycle.before_closing(),
            lifecycle.tracker().clone(),
            config.delivery_capacity,
            metrics.clone(),
        );

        info!(group = %config.consumer_group, ?streams, "commander connected");

        Ok(Self {
            inner: Arc::new(Inner {
                broker,
                config,
                lifecycle,
                multiplexer,
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &CommanderConfig {
        &self.inner.config
    }

    pub fn broker(&self) -> &B {
        &self.inner.broker
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.multiplexer.active_subscriptions()
    }

    /// Publish `command`. Its origin, when set, overrides the configured
    /// command stream.
    #[instrument(skip(self, command), fields(action = %command.action(), id = %command.id()), err)]
    pub async fn produce_command(&self, command: &Command) -> Result<(), CommanderError> {
        let stream = target_stream(command.origin(), &self.inner.config.command_stream);
        info!(%stream, "producing command");

        self.inner.broker.publish(command.to_message(stream)).await?;
        self.inner.metrics.command_produced();
        Ok(())
    }

    /// Publish `event`. Its origin, when set, overrides the configured event
    /// stream.
    #[instrument(
        skip(self, event),
        fields(action = %event.action(), id = %event.id(), parent = %event.parent()),
        err
    )]
    pub async fn produce_event(&self, event: &Event) -> Result<(), CommanderError> {
        let stream = target_stream(event.origin(), &self.inner.config.event_stream);
        info!(%stream, version = event.version(), "producing event");

        self.inner.broker.publish(event.to_message(stream)).await?;
        self.inner.metrics.event_produced();
        Ok(())
    }

    /// Publish `command` without waiting for a result.
    pub async fn async_command(&self, command: &Command) -> Result<(), CommanderError> {
        self.produce_command(command).await
    }

    /// Publish `command` and wait (up to the configured timeout) for the event
    /// whose parent is the command's id.
    pub async fn sync_command(&self, command: &Command) -> Result<Event, CommanderError> {
        self.sync_command_with_timeout(command, self.inner.config.timeout)
            .await
    }

    pub async fn sync_command_with_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Event, CommanderError> {
        let mut events = self.new_events_consumer();
        self.async_command(command).await?;

        let parent = command.id();
        let reply = async {
            while let Some(event) = events.recv().await {
                if event.parent() == parent {
                    return Some(event);
                }
                trace!(%parent, other = %event.parent(), "ignoring unrelated event");
            }
            None
        };

        match tokio::time::timeout(timeout, reply).await {
            Ok(Some(event)) => {
                debug!(%parent, event = %event.id(), "reply received");
                Ok(event)
            }
            Ok(None) => Err(CommanderError::Closed),
            Err(_) => {
                self.inner.metrics.timeout();
                warn!(%parent, action = command.action(), ?timeout, "no reply before timeout");
                Err(CommanderError::Timeout(timeout))
            }
        }
    }

    /// Every command on the command stream.
    ///
    /// Read it or drop it: an unread consumer buffers without limit.
    pub fn new_commands_consumer(&self) -> Consumer<Command> {
        self.new_consumer(&self.inner.config.command_stream, Filter::all())
    }

    /// Commands with `action` only.
    pub fn new_command_consumer(&self, action: impl Into<String>) -> Consumer<Command> {
        self.new_consumer(&self.inner.config.command_stream, Filter::action(action))
    }

    /// Every event on the event stream.
    ///
    /// Read it or drop it: an unread consumer buffers without limit.
    pub fn new_events_consumer(&self) -> Consumer<Event> {
        self.new_consumer(&self.inner.config.event_stream, Filter::all())
    }

    /// Events with `action` whose version is one of `versions`.
    pub fn new_event_consumer(
        &self,
        action: impl Into<String>,
        versions: impl IntoIterator<Item = i32>,
    ) -> Consumer<Event> {
        self.new_consumer(
            &self.inner.config.event_stream,
            Filter::action(action).with_versions(versions),
        )
    }

    /// Raw-stream consumer, e.g. for one of the extra streams.
    pub fn new_consumer<T: Envelope>(&self, stream: impl Into<String>, filter: Filter) -> Consumer<T> {
        Consumer::new(
            self.inner.multiplexer.clone(),
            stream,
            filter,
            self.inner.metrics.clone(),
        )
    }

    /// Run `handler` for every command on the command stream.
    pub fn new_commands_handle<F, Fut>(&self, handler: F) -> SubscriptionHandle
    where
        F: FnMut(Command) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_handler(self.new_commands_consumer(), handler)
    }

    /// Run `handler` for every command with `action`, one at a time.
    pub fn new_command_handle<F, Fut>(&self, action: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: FnMut(Command) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_handler(self.new_command_consumer(action), handler)
    }

    /// Run `handler` for every event with `action` and an accepted version.
    pub fn new_event_handle<F, Fut>(
        &self,
        action: impl Into<String>,
        versions: impl IntoIterator<Item = i32>,
        handler: F,
    ) -> SubscriptionHandle
    where
        F: FnMut(Event) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_handler(self.new_event_consumer(action, versions), handler)
    }

    /// Stop a consumer or handler. Unsubscribing twice is harmless.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if !self.inner.multiplexer.unsubscribe(handle) {
            warn!(subscription = %handle.id(), "unsubscribe of an inactive subscription");
        }
    }

    /// Signal cancelled when shutdown begins, before the broker is released.
    pub fn before_closing(&self) -> CancellationToken {
        self.inner.lifecycle.before_closing()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Shut down: stop every subscription, wait for running handlers to finish
    /// their current envelope, then release the broker.
    ///
    /// Only the first call does anything; later calls return `Ok(())`. Must not
    /// be awaited from inside a handler, which would wait for itself.
    pub async fn close(&self) -> Result<(), CommanderError> {
        if !self.inner.lifecycle.shutdown().await {
            debug!("commander already closed");
            return Ok(());
        }

        self.inner
            .broker
            .close()
            .await
            .map_err(CommanderError::Close)?;

        info!("commander closed");
        Ok(())
    }

    /// Wait for SIGINT/SIGTERM, then [`close`](Self::close).
    pub async fn close_on_signal(&self) -> Result<(), CommanderError> {
        lifecycle::termination().await;
        info!("termination requested");
        self.close().await
    }

    fn spawn_handler<T, F, Fut>(&self, mut consumer: Consumer<T>, mut handler: F) -> SubscriptionHandle
    where
        T: Envelope,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = consumer.handle();
        let subscription = handle.id();

        self.inner.lifecycle.tracker().spawn(async move {
            while let Some(envelope) = consumer.recv().await {
                handler(envelope).await;
            }
            debug!(%subscription, "handler stopped");
        });

        handle
    }
}

fn target_stream<'a>(origin: &'a str, configured: &'a str) -> &'a str {
    if origin.is_empty() { configured } else { origin }
}
