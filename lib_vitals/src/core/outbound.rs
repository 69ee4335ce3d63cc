//! # Outbound Sender
//!
//! Best-effort transmission of an envelope over the live transport. A send
//! while not connected is dropped with a warning; serialization or transport
//! failures are logged. Nothing is queued for retry and nothing is raised to
//! the caller.

use crate::model::Envelope;
use crate::transport::TransportHandle;

/// What happened to one outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No open connection; nothing was transmitted.
    NotConnected,
    /// The envelope could not be serialized or the transport rejected it.
    Failed,
}

/// Sends `envelope` on `handle` if and only if the connection is open.
pub fn transmit(
    handle: Option<&mut (dyn TransportHandle + 'static)>,
    open: bool,
    envelope: &Envelope,
) -> SendOutcome {
    let handle = match handle {
        Some(handle) if open => handle,
        _ => {
            log::warn!("Not connected, dropping outbound '{}' message", envelope.kind());
            return SendOutcome::NotConnected;
        }
    };

    let (kind, data) = match envelope.to_parts() {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("Failed to serialize outbound '{}' message: {}", envelope.kind(), e);
            return SendOutcome::Failed;
        }
    };

    match handle.send(kind.as_str(), data) {
        Ok(()) => SendOutcome::Sent,
        Err(e) => {
            log::error!("Failed to send '{}' message: {}", kind, e);
            SendOutcome::Failed
        }
    }
}
