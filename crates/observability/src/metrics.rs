//! Counters for the produce and delivery paths.
//!
//! Filtered-out envelopes are dropped without logging above `trace`; the
//! `filtered_out` counter is what tells "my handler never fired" apart from
//! "nothing arrived".

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared, lock-free counters. Cheap to clone behind an `Arc`.
#[derive(Debug, Default)]
pub struct CommanderMetrics {
    commands_produced: AtomicU64,
    events_produced: AtomicU64,
    delivered: AtomicU64,
    filtered_out: AtomicU64,
    decode_failures: AtomicU64,
    unrouted: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`CommanderMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub commands_produced: u64,
    pub events_produced: u64,
    /// Envelopes handed to a consumer after filtering.
    pub delivered: u64,
    /// Envelopes a consumer discarded because action or version did not match.
    pub filtered_out: u64,
    /// Raw messages a consumer rejected as undecodable.
    pub decode_failures: u64,
    /// Raw messages that reached no subscription at all.
    pub unrouted: u64,
    pub timeouts: u64,
}

impl CommanderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_produced(&self) {
        self.commands_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_produced(&self) {
        self.events_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn filtered_out(&self) {
        self.filtered_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_produced: self.commands_produced.load(Ordering::Relaxed),
            events_produced: self.events_produced.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
