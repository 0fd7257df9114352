//! `commander-infra` — runtime pieces of the commander.
//!
//! - [`Multiplexer`]: many logical subscriptions over one broker consumer
//! - [`Consumer`]: typed, filtered view over a subscription
//! - [`Commander`]: producing, consuming, request/reply correlation
//! - [`Lifecycle`]: graceful shutdown
//! - [`event_bus`]: infrastructure-backed brokers (feature `redis`)

pub mod commander;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event_bus;
pub mod filter;
pub mod lifecycle;
pub mod multiplexer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use commander::Commander;
pub use config::{CommanderConfig, ConfigError};
pub use consumer::Consumer;
pub use error::CommanderError;
pub use filter::Filter;
pub use lifecycle::Lifecycle;
pub use multiplexer::{Multiplexer, Subscription, SubscriptionHandle, SubscriptionId, ANY_STREAM};
