//! Tracks connected peers and fans generator output out to them.
//!
//! Each peer is represented by the sending half of its writer queue. A failed
//! send means the peer's writer is gone, so the peer is pruned on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::core::FanOut;
use crate::model::Envelope;

pub type PeerId = usize;

/// What a peer's writer task should put on the socket next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    Text(String),
    /// Send a normal close frame and stop writing.
    Close,
}

#[derive(Default)]
pub struct PeerHub {
    peers: Mutex<HashMap<PeerId, mpsc::UnboundedSender<PeerFrame>>>,
    next_id: AtomicUsize,
}

impl PeerHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, mpsc::UnboundedSender<PeerFrame>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, tx: mpsc::UnboundedSender<PeerFrame>) -> PeerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(id, tx);
        log::info!("Peer {} connected", id);
        id
    }

    pub fn remove(&self, id: PeerId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            log::info!("Peer {} disconnected", id);
        }
        removed
    }

    /// Sends `envelope` to every open peer and returns how many accepted it.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to serialize '{}' for broadcast: {}", envelope.kind(), e);
                return 0;
            }
        };

        let mut peers = self.lock();
        peers.retain(|id, tx| {
            let open = tx.send(PeerFrame::Text(text.clone())).is_ok();
            if !open {
                log::debug!("Pruning closed peer {}", id);
            }
            open
        });
        peers.len()
    }

    /// Asks every peer to close and forgets them all.
    pub fn close_all(&self) -> usize {
        let peers: Vec<_> = self.lock().drain().collect();
        for (_, tx) in &peers {
            let _ = tx.send(PeerFrame::Close);
        }
        if !peers.is_empty() {
            log::info!("Closed {} peer connection(s)", peers.len());
        }
        peers.len()
    }

    pub fn peer_count(&self) -> usize {
        self.lock().len()
    }
}

impl FanOut for PeerHub {
    fn publish(&self, envelope: &Envelope) {
        self.broadcast(envelope);
    }
}
