//! Broker adapters backed by real infrastructure.
//!
//! The [`Broker`](commander_events::Broker) contract lives in `commander-events`
//! as pure mechanics. This module provides infrastructure-backed implementations.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, RedisStreamsConfig};
