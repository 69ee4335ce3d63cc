//! # WebSocket Transport
//!
//! Client transport over `tokio-tungstenite`. Each `open` spawns one socket
//! task that connects, reports `Open`, and then multiplexes three things in a
//! `select!` loop: cancellation from the handle, outbound frames queued by
//! `send`, and inbound frames from the server. Inbound text frames are split
//! into `{type, data}` and reported as named messages.
//!
//! The task never reconnects on its own. Any read/write failure or remote
//! close is reported once and the task ends; recovery belongs to the
//! connection manager.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::transport::{
    frame, EventSink, Transport, TransportError, TransportEvent, TransportHandle,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(
        &mut self,
        endpoint: &str,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();
        runtime.spawn(run_socket(endpoint.to_string(), events, outbound_rx, cancel.clone()));

        Ok(Box::new(WsHandle { outbound: outbound_tx, cancel }))
    }
}

struct WsHandle {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl TransportHandle for WsHandle {
    fn send(&mut self, name: &str, data: Value) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let text = frame::encode(name, &data)?;
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket(
    url: String,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    log::info!("Connecting to {}", url);

    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };
    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            log::error!("Failed to connect to {}: {}", url, e);
            events.emit(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    log::info!("Connected to {}", url);
    events.emit(TransportEvent::Open);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("Closing socket to {}", url);
                let _ = write.close().await;
                return;
            }
            Some(text) = outbound.recv() => {
                log::trace!("Sending frame: {}", text);
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    log::error!("Failed to send frame: {}", e);
                    events.emit(TransportEvent::Error(e.to_string()));
                    return;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match frame::decode(text.as_str()) {
                        Ok((name, data)) => {
                            events.emit(TransportEvent::Message { name, data });
                        }
                        Err(e) => {
                            events.emit(TransportEvent::Undecodable(e.to_string()));
                        }
                    },
                    Some(Ok(Message::Close(close))) => {
                        let reason = close
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by server".to_string());
                        log::warn!("Server closed the connection: {}", reason);
                        events.emit(TransportEvent::Close(reason));
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("Read error: {}", e);
                        events.emit(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        log::warn!("Stream closed by remote host.");
                        events.emit(TransportEvent::Close("stream ended".to_string()));
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new();

        // Port 1 on loopback refuses connections.
        let _handle = transport.open("ws://127.0.0.1:1/ws", EventSink::new(9, tx)).unwrap();

        let (generation, event) = rx.recv().await.unwrap();
        assert_eq!(generation, 9);
        assert!(matches!(event, TransportEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new();
        let mut handle = transport.open("ws://127.0.0.1:1/ws", EventSink::new(1, tx)).unwrap();

        handle.close();
        assert!(matches!(handle.send("subscribe", Value::Null), Err(TransportError::Closed)));
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new();
        let result = transport.open("ws://127.0.0.1:1/ws", EventSink::new(1, tx));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
