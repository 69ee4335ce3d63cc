//! # Core Dispatch Module
//!
//! The transport-agnostic heart of the client. Data flows
//! transport → [`ConnectionManager`] → [`InboundNormalizer`] → [`ListenerRegistry`]
//! → listener callbacks; outbound envelopes take the reverse path through
//! [`outbound::transmit`].
//!
//! ## Core Components:
//!
//! - **`registry`**: message type → ordered listener list, with per-listener
//!   failure isolation during dispatch.
//! - **`subject`**: the last subject identifier seen on a non-error message,
//!   owned by the composition root instead of living in a global.
//! - **`budget`**: a fixed-ceiling counter that keeps diagnostic logging cost
//!   independent of message volume.
//! - **`normalizer`**: raw transport event → [`Envelope`](crate::model::Envelope)
//!   → subject update → fan-out.
//! - **`outbound`**: best-effort send over the live transport.
//! - **`connection`**: the connection lifecycle state machine with its single
//!   pending reconnect timer.
//! - **`fanout`**: the sink trait the generator and server publish into.

#![forbid(unsafe_code)]

/// Bounded diagnostic logging budget.
pub mod budget;
/// Connection lifecycle state machine.
pub mod connection;
/// Sink abstraction for publishers.
pub mod fanout;
/// Raw transport event normalization.
pub mod normalizer;
/// Best-effort outbound sends.
pub mod outbound;
/// Listener registry keyed by message type.
pub mod registry;
/// Shared subject identifier.
pub mod subject;

// --- Public API Re-exports ---
pub use budget::LogBudget;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use fanout::FanOut;
pub use normalizer::InboundNormalizer;
pub use outbound::SendOutcome;
pub use registry::{listener, DispatchReport, Listener, ListenerError, ListenerRegistry};
pub use subject::SubjectStore;
