//! # Connection Lifecycle Manager
//!
//! Keeps exactly one logical connection to a message source and re-establishes
//! it after failure with a fixed delay.
//!
//! ## State machine
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open
//!   ▲                   │                  │
//!   │                 error            close/error
//!   │                   ▼                  ▼
//!   └──(RECONNECT_DELAY)── Errored / Closed ◀┘
//! ```
//!
//! `disconnect` moves any state straight to `Idle` and cancels a pending
//! reconnect. A reconnect timer is at most one deadline; scheduling while one
//! is pending is a no-op.
//!
//! ## Execution model
//!
//! All state lives in one task. Public calls are commands sent to it, transport
//! events arrive on a second channel, and the reconnect deadline is a third
//! `select!` branch, so every transition, every normalizer call and every
//! listener callback runs on that one task in arrival order. Events are polled
//! before commands.
//!
//! Each connection attempt gets a new generation number and the handle's event
//! sink is stamped with it. Tearing a handle down bumps the generation, so once
//! `disconnect().await` returns, nothing the old handle still emits reaches the
//! normalizer.
//!
//! Timing uses `tokio::time`, so tests drive the reconnect delay with the paused
//! virtual clock instead of waiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use crate::constants::RECONNECT_DELAY;
use crate::core::normalizer::InboundNormalizer;
use crate::core::outbound::{self, SendOutcome};
use crate::model::Envelope;
use crate::transport::{EventSink, Transport, TransportEvent, TransportHandle};

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle and nothing in flight. Initial state and the result of `disconnect`.
    Idle,
    /// A handle exists and is waiting for the transport's `open`.
    Connecting,
    /// The transport reported `open`.
    Open,
    /// The peer closed the connection; a reconnect is pending.
    Closed,
    /// Opening or the live connection failed; a reconnect is pending.
    Errored,
}

/// Snapshot of the manager's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_pending: bool,
    /// Whether a transport handle is currently held.
    pub live_handle: bool,
    /// Total number of `Transport::open` calls made.
    pub opens_attempted: u64,
}

impl ConnectionStatus {
    fn stopped() -> Self {
        Self {
            state: ConnectionState::Idle,
            connected: false,
            reconnect_pending: false,
            live_handle: false,
            opens_attempted: 0,
        }
    }
}

enum Command {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Send(Envelope),
    Status(oneshot::Sender<ConnectionStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// # Connection Manager
///
/// Cheap to clone; all clones drive the same connection. The background task
/// stops on [`shutdown`](Self::shutdown) or once every clone is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    connected: watch::Receiver<bool>,
    endpoint: Arc<str>,
}

impl ConnectionManager {
    /// Creates the manager and spawns its task. Starts `Idle`; nothing is
    /// opened until [`connect`](Self::connect).
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn create<T: Transport>(
        endpoint: impl Into<String>,
        transport: T,
        normalizer: Arc<InboundNormalizer>,
    ) -> Self {
        let endpoint: String = endpoint.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        let lifecycle = Lifecycle {
            endpoint: endpoint.clone(),
            transport: Box::new(transport),
            normalizer,
            handle: None,
            state: ConnectionState::Idle,
            generation: 0,
            reconnect_at: None,
            reconnect_delay: RECONNECT_DELAY,
            opens_attempted: 0,
            events_tx,
            connected_tx,
        };
        tokio::spawn(lifecycle.run(commands_rx, events_rx));

        Self { commands: commands_tx, connected: connected_rx, endpoint: endpoint.into() }
    }

    fn request(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            log::warn!("Connection manager for {} is shut down", self.endpoint);
            return false;
        }
        true
    }

    /// Opens a connection unless one is already connecting or open.
    pub fn connect(&self) {
        self.request(Command::Connect);
    }

    /// Cancels any pending reconnect and closes the live handle. When this
    /// returns, no further events from that handle are dispatched.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.request(Command::Disconnect(tx)) {
            let _ = rx.await;
        }
    }

    /// Best-effort send. Dropped with a warning when not connected.
    pub fn send(&self, envelope: Envelope) {
        self.request(Command::Send(envelope));
    }

    pub async fn status(&self) -> ConnectionStatus {
        let (tx, rx) = oneshot::channel();
        if !self.request(Command::Status(tx)) {
            return ConnectionStatus::stopped();
        }
        rx.await.unwrap_or_else(|_| ConnectionStatus::stopped())
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Follows the connected flag.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Disconnects and stops the background task. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Lifecycle {
    endpoint: String,
    transport: Box<dyn Transport>,
    normalizer: Arc<InboundNormalizer>,
    handle: Option<Box<dyn TransportHandle>>,
    state: ConnectionState,
    generation: u64,
    reconnect_at: Option<Instant>,
    reconnect_delay: Duration,
    opens_attempted: u64,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    connected_tx: watch::Sender<bool>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Lifecycle {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        loop {
            let deadline = self.reconnect_at;
            tokio::select! {
                biased;
                Some((generation, event)) = events.recv() => self.on_event(generation, event),
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sleep_until_opt(deadline) => self.fire_reconnect(),
            }
        }
        self.disconnect();
        log::debug!("Connection manager for {} stopped", self.endpoint);
    }

    /// Returns `false` when the task should stop.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect(ack) => {
                self.disconnect();
                let _ = ack.send(());
            }
            Command::Send(envelope) => {
                let open = self.state == ConnectionState::Open;
                if outbound::transmit(self.handle.as_deref_mut(), open, &envelope) == SendOutcome::Sent {
                    log::debug!("Sent '{}' message", envelope.kind());
                }
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(ack) => {
                self.disconnect();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn connect(&mut self) {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            log::debug!("Already {:?}, ignoring connect to {}", self.state, self.endpoint);
            return;
        }

        // An explicit attempt supersedes a pending reconnect; a failure below
        // schedules a fresh one.
        self.reconnect_at = None;
        self.generation += 1;
        self.opens_attempted += 1;
        self.set_state(ConnectionState::Connecting);

        let sink = EventSink::new(self.generation, self.events_tx.clone());
        match self.transport.open(&self.endpoint, sink) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                log::error!("Failed to open connection: {}", e);
                self.drop_connection(ConnectionState::Errored);
            }
        }
    }

    fn disconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            log::info!("Pending reconnect to {} cancelled", self.endpoint);
        }
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            log::info!("Disconnected from {}", self.endpoint);
        }
        self.generation += 1;
        self.set_state(ConnectionState::Idle);
    }

    fn on_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation || self.handle.is_none() {
            log::trace!("Ignoring stale event from connection #{}: {:?}", generation, event);
            return;
        }

        match event {
            TransportEvent::Open => {
                log::info!("Connection to {} established", self.endpoint);
                self.set_state(ConnectionState::Open);
            }
            TransportEvent::Message { name, data } => {
                // Failures are logged by the normalizer and stay local.
                let _ = self.normalizer.ingest(&name, data);
            }
            TransportEvent::Undecodable(reason) => self.normalizer.undecodable(&reason),
            TransportEvent::Close(reason) => {
                log::warn!("Connection to {} closed: {}", self.endpoint, reason);
                self.drop_connection(ConnectionState::Closed);
            }
            TransportEvent::Error(reason) => {
                log::error!("Connection to {} failed: {}", self.endpoint, reason);
                self.drop_connection(ConnectionState::Errored);
            }
        }
    }

    /// Discards the handle after a failure and arms the reconnect timer.
    fn drop_connection(&mut self, state: ConnectionState) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.generation += 1;
        self.set_state(state);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            log::debug!("Reconnect to {} already pending", self.endpoint);
            return;
        }
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        log::info!(
            "Reconnecting to {} in {} ms",
            self.endpoint,
            self.reconnect_delay.as_millis()
        );
    }

    fn fire_reconnect(&mut self) {
        self.reconnect_at = None;
        log::info!("Attempting to reconnect to {}...", self.endpoint);
        self.set_state(ConnectionState::Idle);
        self.connect();
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let connected = state == ConnectionState::Open;
        self.connected_tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            connected: self.state == ConnectionState::Open,
            reconnect_pending: self.reconnect_at.is_some(),
            live_handle: self.handle.is_some(),
            opens_attempted: self.opens_attempted,
        }
    }
}
