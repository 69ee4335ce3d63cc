//! # Loopback Transport
//!
//! An in-process transport: every `open` creates a [`LoopbackPeer`] that the
//! caller drives by hand. The peer can announce `open`, deliver named events,
//! drop the connection or fail it, and it records every frame the client
//! sends. This makes the connection state machine observable without sockets
//! or wall-clock waits, and backs the fully local demo mode where there is no
//! remote data source at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::transport::{EventSink, Transport, TransportError, TransportEvent, TransportHandle};

#[derive(Default)]
struct LoopbackState {
    peers: Vec<LoopbackPeer>,
    manual_open: bool,
    refuse: bool,
}

/// Cloneable; all clones share the same peer list and settings.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    /// Peers report `open` as soon as they are created.
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers stay in the connecting phase until [`LoopbackPeer::open`] is called.
    pub fn manual() -> Self {
        let transport = Self::default();
        transport.lock().manual_open = true;
        transport
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When set, `open` fails immediately as if the endpoint were unreachable.
    pub fn set_refuse(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Every peer created so far, oldest first.
    pub fn peers(&self) -> Vec<LoopbackPeer> {
        self.lock().peers.clone()
    }

    pub fn last_peer(&self) -> Option<LoopbackPeer> {
        self.lock().peers.last().cloned()
    }

    /// Peers whose handle has not been closed.
    pub fn live_peers(&self) -> usize {
        self.lock().peers.iter().filter(|p| !p.is_closed()).count()
    }
}

impl Transport for LoopbackTransport {
    fn open(
        &mut self,
        endpoint: &str,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let mut state = self.lock();
        if state.refuse {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let peer = LoopbackPeer {
            inner: Arc::new(PeerInner {
                endpoint: endpoint.to_string(),
                events,
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };
        state.peers.push(peer.clone());
        if !state.manual_open {
            peer.open();
        }
        Ok(Box::new(LoopbackHandle { peer }))
    }
}

struct PeerInner {
    endpoint: String,
    events: EventSink,
    sent: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
}

/// The far end of one loopback connection.
#[derive(Clone)]
pub struct LoopbackPeer {
    inner: Arc<PeerInner>,
}

impl LoopbackPeer {
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn generation(&self) -> u64 {
        self.inner.events.generation()
    }

    /// Emits a raw event, even after the handle was closed (a late callback).
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.inner.events.emit(event)
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn deliver(&self, name: &str, data: Value) -> bool {
        self.emit(TransportEvent::Message { name: name.to_string(), data })
    }

    /// Simulates the remote side dropping the connection.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Close(reason.to_string()))
    }

    pub fn fail(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Error(reason.to_string()))
    }

    /// Frames the client sent through this peer's handle.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.inner.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether the client closed its handle.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

struct LoopbackHandle {
    peer: LoopbackPeer,
}

impl TransportHandle for LoopbackHandle {
    fn send(&mut self, name: &str, data: Value) -> Result<(), TransportError> {
        if self.peer.is_closed() {
            return Err(TransportError::Closed);
        }
        self.peer
            .inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), data));
        Ok(())
    }

    fn close(&mut self) {
        self.peer.inner.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_open_announces_and_records_sends() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = LoopbackTransport::new();

        let mut handle = transport.open("loop://a", EventSink::new(4, tx)).unwrap();
        handle.send("subscribe", json!({"channels": []})).unwrap();

        assert_eq!(rx.try_recv().unwrap(), (4, TransportEvent::Open));
        let peer = transport.last_peer().unwrap();
        assert_eq!(peer.endpoint(), "loop://a");
        assert_eq!(peer.sent(), vec![("subscribe".to_string(), json!({"channels": []}))]);

        handle.close();
        assert!(peer.is_closed());
        assert!(matches!(handle.send("x", Value::Null), Err(TransportError::Closed)));
        assert_eq!(transport.live_peers(), 0);
    }

    #[test]
    fn test_manual_mode_waits_for_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = LoopbackTransport::manual();
        let _handle = transport.open("loop://b", EventSink::new(1, tx)).unwrap();

        assert!(rx.try_recv().is_err());
        transport.last_peer().unwrap().open();
        assert_eq!(rx.try_recv().unwrap(), (1, TransportEvent::Open));
    }

    #[test]
    fn test_refuse_fails_open() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = LoopbackTransport::new();
        transport.set_refuse(true);

        let result = transport.open("loop://c", EventSink::new(1, tx));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert!(transport.peers().is_empty());
    }
}
