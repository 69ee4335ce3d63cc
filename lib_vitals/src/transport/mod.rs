//! # Transport Boundary
//!
//! The abstract bidirectional channel the [`ConnectionManager`] drives. A
//! transport opens a [`TransportHandle`] to an endpoint and reports what
//! happens on it (`open`, named messages, `close`, `error`) through an
//! [`EventSink`]. The manager owns the handle exclusively.
//!
//! Each sink is stamped with the generation of the connection attempt it
//! belongs to. The manager bumps its generation whenever it tears a handle
//! down, which is how late events from a dead handle are recognised and
//! discarded.
//!
//! ## Implementations:
//! - **`loopback`**: in-process peers driven by the caller. Used for the
//!   fully local mode and for exercising the state machine in tests.
//! - **`ws`** (feature `ws`): WebSocket client exchanging `{type, data}` JSON
//!   text frames.
//!
//! [`ConnectionManager`]: crate::core::ConnectionManager

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// `{type, data}` JSON text framing.
pub mod frame;
/// In-process transport.
pub mod loopback;
/// WebSocket client transport.
#[cfg(feature = "ws")]
pub mod ws;

pub use loopback::{LoopbackPeer, LoopbackTransport};
#[cfg(feature = "ws")]
pub use ws::WsTransport;

/// Something that happened on a transport handle.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// A named event arrived with its raw payload.
    Message { name: String, data: Value },
    /// A frame arrived that could not be split into name and payload.
    Undecodable(String),
    /// The peer closed the connection.
    Close(String),
    /// The connection failed, before or after opening.
    Error(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("transport is closed")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where a transport reports the events of one handle.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Reports `event`. Returns `false` once nobody is listening anymore.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Opens connections to an endpoint.
pub trait Transport: Send + 'static {
    /// Starts connecting to `endpoint` and returns the handle right away; the
    /// outcome arrives on `events` as `Open` or `Error`. An `Err` here means the
    /// attempt could not even be started.
    fn open(
        &mut self,
        endpoint: &str,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// One live connection.
pub trait TransportHandle: Send {
    /// Transmits a named event.
    fn send(&mut self, name: &str, data: Value) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    fn close(&mut self);
}
