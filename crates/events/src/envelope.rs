use crate::error::DecodeError;
use crate::message::RawMessage;

/// Something a typed consumer can decode raw broker messages into.
///
/// Implemented by [`Command`](crate::Command) and [`Event`](crate::Event).
pub trait Envelope: Clone + core::fmt::Debug + Send + Sync + Sized + 'static {
    fn populate(message: &RawMessage) -> Result<Self, DecodeError>;

    /// Handler selector.
    fn action(&self) -> &str;

    /// Payload schema version, for envelopes that carry one.
    fn version(&self) -> Option<i32> {
        None
    }
}
