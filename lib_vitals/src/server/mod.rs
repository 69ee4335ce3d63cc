//! # Broadcast Server
//!
//! Axum WebSocket endpoint that every connected peer receives generator output
//! on.
//!
//! ## Per peer:
//! 1.  A `connected` acknowledgement is queued before the peer joins the hub,
//!     so it is always the first frame.
//! 2.  A `subscribe` request is answered with `subscribed`, echoing the
//!     requested channels.
//! 3.  Text that is not JSON is answered with an `error` envelope, to that peer
//!     only.
//!
//! Outbound frames (replies and broadcasts) go through one writer task per
//! peer, so they never interleave mid-frame. On shutdown every peer gets a
//! normal close frame.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use crate::model::{now_millis, ConnectedMessage, Envelope, ErrorMessage, SubscribedMessage};

/// Peer bookkeeping and broadcast.
pub mod hub;

pub use hub::{PeerFrame, PeerHub, PeerId};

const SHUTDOWN_REASON: &str = "server shutting down";

pub fn router(hub: Arc<PeerHub>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(hub)
}

/// Serves on `listener` until `shutdown` fires, then closes every peer.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<PeerHub>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Broadcast server listening on {}", addr);
    }

    let app = router(Arc::clone(&hub));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Broadcast server shutting down.");
            hub.close_all();
        })
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<PeerHub>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, hub))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn queue(tx: &mpsc::UnboundedSender<PeerFrame>, envelope: &Envelope) -> bool {
    match envelope.to_json() {
        Ok(text) => tx.send(PeerFrame::Text(text)).is_ok(),
        Err(e) => {
            log::error!("Failed to serialize '{}': {}", envelope.kind(), e);
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<PeerHub>) {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<PeerFrame>();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                PeerFrame::Text(text) => Message::Text(text.into()),
                PeerFrame::Close => {
                    let close = CloseFrame { code: close_code::NORMAL, reason: SHUTDOWN_REASON.into() };
                    let _ = write.send(Message::Close(Some(close))).await;
                    break;
                }
            };
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    queue(&tx, &Envelope::Connected(ConnectedMessage {
        message: "connection established".to_string(),
        timestamp: now_millis(),
    }));
    let id = hub.register(tx.clone());

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    log::debug!("Peer {} sent: {}", id, text.as_str());
                    if let Some(reply) = reply_to(text.as_str()) {
                        queue(&tx, &reply);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("Peer {} read error: {}", id, e);
                    break;
                }
            },
        }
    }

    hub.remove(id);
    drop(tx);
    writer.abort();
}

/// The server's answer to one inbound text frame, if any.
pub fn reply_to(text: &str) -> Option<Envelope> {
    let message: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::error!("Failed to parse peer message: {}", e);
            return Some(Envelope::Error(ErrorMessage {
                origin: "server".to_string(),
                msg: "failed to parse message".to_string(),
            }));
        }
    };

    match message.get("type").and_then(Value::as_str) {
        Some("subscribe") => {
            let channels = message
                .pointer("/data/channels")
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            Some(Envelope::Subscribed(SubscribedMessage { channels, timestamp: now_millis() }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_echoes_channels() {
        let reply = reply_to(r#"{"type":"subscribe","data":{"channels":["alarm","activity"]}}"#);
        match reply {
            Some(Envelope::Subscribed(ack)) => {
                assert_eq!(ack.channels, vec!["alarm", "activity"]);
                assert!(ack.timestamp > 0);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_without_channels_echoes_empty_list() {
        let reply = reply_to(r#"{"type":"subscribe"}"#);
        assert!(matches!(reply, Some(Envelope::Subscribed(ack)) if ack.channels.is_empty()));
    }

    #[test]
    fn test_malformed_json_gets_error_envelope() {
        let reply = reply_to("{not json").unwrap();
        assert_eq!(
            reply,
            Envelope::Error(ErrorMessage {
                origin: "server".into(),
                msg: "failed to parse message".into()
            })
        );
        assert!(reply.subject_id().is_none());
    }

    #[test]
    fn test_other_messages_are_ignored() {
        assert!(reply_to(r#"{"type":"ping","data":{}}"#).is_none());
        assert!(reply_to("[1,2,3]").is_none());
    }
}
