//! # lib_vitals
//!
//! Real-time vital-sign telemetry distribution: a reconnecting pub/sub client
//! that normalizes every inbound transport event into a typed [`Envelope`] and
//! fans it out to listeners keyed by message type, plus the synthetic data
//! generator and broadcast server that feed it.
//!
//! ## Folder layout:
//! - **`model`**: the closed set of message payloads.
//! - **`core`**: listener registry, inbound normalizer, outbound sender and the
//!   connection lifecycle manager.
//! - **`transport`**: the transport boundary plus the loopback and (feature
//!   `ws`) WebSocket implementations.
//! - **`generator`** (feature `generator`): periodic payload synthesis.
//! - **`server`** (feature `server`): axum broadcast endpoint.
//! - **`client`**: the composition root a subscriber (e.g. a UI) talks to.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod client;
pub mod constants;
pub mod core;
pub mod model;
pub mod transport;

#[cfg(feature = "generator")]
pub mod generator;

#[cfg(feature = "server")]
pub mod server;

// --- Public API Re-exports ---
pub use client::VitalsClient;
pub use core::{
    listener, ConnectionManager, ConnectionState, ConnectionStatus, FanOut, InboundNormalizer,
    Listener, ListenerRegistry, SendOutcome, SubjectStore,
};
pub use model::{Envelope, EnvelopeError, MessageKind};
pub use transport::{Transport, TransportError, TransportEvent, TransportHandle};
