//! `commander-core` — identifier building blocks shared by every crate.
//!
//! Pure values, no IO.

pub mod error;
pub mod id;

pub use error::IdError;
pub use id::{EnvelopeId, PartitionKey};
