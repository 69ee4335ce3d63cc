//! # Message Model
//!
//! The typed payloads that travel between the generator, the transport and the
//! listeners. Every payload is wrapped in an [`Envelope`] whose `type` tag fixes
//! the shape of its `data`.

/// The tagged envelope and its payload structs.
pub mod envelope;

pub use envelope::{
    ActivityMessage, AlarmMessage, ConnectedMessage, EcgStreamMessage, EcgUpdateMessage,
    Envelope, EnvelopeError, ErrorMessage, MessageKind, SubscribeMessage, SubscribedMessage,
    TempUpdateMessage,
};

/// Wall-clock milliseconds since the Unix epoch, as carried in `ts` fields.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
