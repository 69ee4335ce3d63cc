//! # Vitals Client
//!
//! The composition root a subscriber (typically a UI) talks to. It owns the
//! listener registry, the subject store, the normalizer and the connection
//! manager, and wires them together once at construction. Nothing here is a
//! process-wide singleton, so independent clients can coexist in one process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::core::{
    ConnectionManager, ConnectionStatus, DispatchReport, InboundNormalizer, Listener,
    ListenerError, ListenerRegistry, SubjectStore,
};
use crate::model::{Envelope, SubscribeMessage};
use crate::transport::Transport;

pub struct VitalsClient {
    registry: Arc<ListenerRegistry>,
    subject: Arc<SubjectStore>,
    normalizer: Arc<InboundNormalizer>,
    connection: ConnectionManager,
    messages: Arc<Mutex<Vec<Envelope>>>,
}

impl VitalsClient {
    /// Builds a client for `endpoint` over `transport`. Does not connect.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new<T: Transport>(endpoint: impl Into<String>, transport: T) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let subject = Arc::new(SubjectStore::new());
        let normalizer = Arc::new(InboundNormalizer::new(
            Arc::clone(&registry),
            Arc::clone(&subject),
        ));
        let connection = ConnectionManager::create(endpoint, transport, Arc::clone(&normalizer));

        Self {
            registry,
            subject,
            normalizer,
            connection,
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<Envelope>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on(&self, kind: &str, listener: Listener) {
        self.registry.on(kind, listener);
    }

    pub fn off(&self, kind: &str, listener: Option<&Listener>) -> bool {
        self.registry.off(kind, listener)
    }

    /// Registers `callback` for `kind` and records every envelope it receives
    /// into the message log. Returns the registered listener for `off`.
    pub fn on_message<F>(&self, kind: &str, callback: F) -> Listener
    where
        F: Fn(&Envelope) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let log = Arc::clone(&self.messages);
        let listener: Listener = Arc::new(move |envelope: &Envelope| {
            log.lock().unwrap_or_else(PoisonError::into_inner).push(envelope.clone());
            callback(envelope)
        });
        self.registry.on(kind, Arc::clone(&listener));
        listener
    }

    /// Envelopes recorded by [`on_message`](Self::on_message) listeners, oldest first.
    pub fn messages(&self) -> Vec<Envelope> {
        self.recorded().clone()
    }

    pub fn clear_messages(&self) {
        self.recorded().clear();
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Best-effort send over the live connection.
    pub fn send(&self, envelope: Envelope) {
        self.connection.send(envelope);
    }

    /// Asks the server for the given channels. The server answers `subscribed`.
    pub fn subscribe<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels = channels.into_iter().map(Into::into).collect();
        self.send(Envelope::Subscribe(SubscribeMessage { channels }));
    }

    /// Runs the listeners for `envelope`'s type directly, without the transport
    /// and without touching the subject.
    pub fn dispatch_local(&self, envelope: &Envelope) -> DispatchReport {
        self.registry.dispatch(envelope.kind().as_str(), envelope)
    }

    /// The last subject id seen on a non-error message.
    pub fn subject(&self) -> String {
        self.subject.current()
    }

    pub fn subject_store(&self) -> &Arc<SubjectStore> {
        &self.subject
    }

    /// The normalizer as a publish sink, for feeding a local generator.
    pub fn normalizer(&self) -> Arc<InboundNormalizer> {
        Arc::clone(&self.normalizer)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connection.watch_connected()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.connection.status().await
    }

    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{listener, ConnectionState};
    use crate::model::{ErrorMessage, TempUpdateMessage};
    use crate::transport::LoopbackTransport;
    use serde_json::json;

    fn temp(user: &str) -> Envelope {
        Envelope::TempUpdate(TempUpdateMessage {
            user_id: user.to_string(),
            object_c: 33.1,
            ambient_c: 26.0,
            smoothed_object_c: 33.0,
            alarm: None,
            ts: 1_000,
        })
    }

    #[tokio::test]
    async fn test_on_message_records_and_forwards() {
        let client = VitalsClient::new("loop://", LoopbackTransport::new());
        let forwarded = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&forwarded);
        client.on_message("temp_update", move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });

        client.dispatch_local(&temp("u1"));
        client.dispatch_local(&temp("u2"));

        assert_eq!(*forwarded.lock().unwrap(), 2);
        assert_eq!(client.messages(), vec![temp("u1"), temp("u2")]);

        client.clear_messages();
        assert!(client.messages().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_local_bypasses_subject_tracking() {
        let client = VitalsClient::new("loop://", LoopbackTransport::new());
        let report = client.dispatch_local(&temp("u9"));

        assert_eq!(report, DispatchReport::default());
        assert_eq!(client.subject(), "");
    }

    #[tokio::test]
    async fn test_off_with_returned_listener() {
        let client = VitalsClient::new("loop://", LoopbackTransport::new());
        let recorder = client.on_message("error", |_| Ok(()));
        client.on("error", listener(|_| Ok(())));

        assert!(client.off("error", Some(&recorder)));
        let err = Envelope::Error(ErrorMessage { origin: "server".into(), msg: "x".into() });
        assert_eq!(client.dispatch_local(&err).delivered, 1);
        assert!(client.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_goes_over_the_live_connection() {
        let transport = LoopbackTransport::new();
        let client = VitalsClient::new("loop://", transport.clone());

        client.connect();
        assert_eq!(client.status().await.state, ConnectionState::Open);
        client.subscribe(["alarm", "temp_update"]);
        client.status().await;

        let peer = transport.last_peer().unwrap();
        assert_eq!(
            peer.sent(),
            vec![("subscribe".to_string(), json!({"channels": ["alarm", "temp_update"]}))]
        );

        client.shutdown().await;
        assert!(!client.is_connected());
    }
}
