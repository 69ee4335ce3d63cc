//! Connection lifecycle scenarios over the loopback transport, driven by the
//! paused tokio clock.

use std::time::Duration;

use lib_vitals::constants::RECONNECT_DELAY;
use lib_vitals::core::{InboundNormalizer, ListenerRegistry, SubjectStore};
use lib_vitals::transport::LoopbackTransport;
use lib_vitals::{listener, ConnectionState, MessageKind, VitalsClient};
use project_tests::{sample_alarm, Recorder};
use serde_json::json;
use std::sync::Arc;
use tokio::time::sleep;

fn ecg(t: u64) -> serde_json::Value {
    json!({"user_id": "u2", "fs_hz": 100, "t": t, "easi_ai": 0.001, "easi_es": 0.0, "easi_as": 0.0})
}

async fn connected_client(transport: &LoopbackTransport) -> VitalsClient {
    let client = VitalsClient::new("loop://vitals", transport.clone());
    client.connect();
    assert_eq!(client.status().await.state, ConnectionState::Open);
    client
}

#[tokio::test(start_paused = true)]
async fn test_close_then_disconnect_cancels_the_only_timer() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;

    transport.last_peer().unwrap().drop_connection("server restart");
    let status = client.status().await;
    assert!(status.reconnect_pending);
    assert!(!status.connected);

    client.disconnect().await;
    sleep(RECONNECT_DELAY * 4).await;

    let status = client.status().await;
    assert_eq!(status.state, ConnectionState::Idle);
    assert!(!status.reconnect_pending);
    assert_eq!(status.opens_attempted, 1);
    assert_eq!(transport.peers().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_fixed_delay() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;
    let streams = Recorder::new();
    client.on("ecg_stream", streams.listener());
    let first = transport.last_peer().unwrap();

    first.drop_connection("server restart");
    sleep(RECONNECT_DELAY - Duration::from_millis(1)).await;
    assert_eq!(client.status().await.opens_attempted, 1, "fired early");

    sleep(Duration::from_millis(2)).await;
    let status = client.status().await;
    assert_eq!(status.opens_attempted, 2);
    assert!(status.connected);

    let second = transport.last_peer().unwrap();
    assert_ne!(first.generation(), second.generation());
    first.deliver("ecg_stream", ecg(1));
    second.deliver("ecg_stream", ecg(2));
    client.status().await;

    assert_eq!(streams.len(), 1);
    assert_eq!(client.subject(), "u2");
}

#[tokio::test(start_paused = true)]
async fn test_double_connect_keeps_one_handle() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;

    client.connect();
    client.connect();
    client.status().await;

    assert_eq!(transport.peers().len(), 1);
    assert_eq!(transport.live_peers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sent_envelope_reconstructs_on_the_far_side() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;

    client.send(sample_alarm());
    client.status().await;

    let far_registry = Arc::new(ListenerRegistry::new());
    let far_side = InboundNormalizer::new(Arc::clone(&far_registry), Arc::new(SubjectStore::new()));
    let received = Recorder::new();
    far_registry.on("alarm", received.listener());

    let sent = transport.last_peer().unwrap().sent();
    assert_eq!(sent.len(), 1);
    let (name, data) = sent.into_iter().next().unwrap();
    far_side.ingest(&name, data).unwrap();

    assert_eq!(received.all(), vec![sample_alarm()]);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_transmits_nothing() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;
    let peer = transport.last_peer().unwrap();

    peer.fail("network down");
    client.send(sample_alarm());
    client.subscribe(["alarm"]);
    client.status().await;

    assert!(peer.sent().is_empty());
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_no_late_events_after_disconnect() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;
    let streams = Recorder::new();
    client.on("ecg_stream", streams.listener());
    let peer = transport.last_peer().unwrap();

    client.disconnect().await;
    peer.deliver("ecg_stream", ecg(1));
    peer.fail("late error");
    let status = client.status().await;

    assert!(streams.is_empty());
    assert!(!status.reconnect_pending);
    assert!(peer.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_reconnect_is_observable() {
    let transport = LoopbackTransport::new();
    transport.set_refuse(true);
    let client = VitalsClient::new("loop://down", transport.clone());
    let mut connected = client.watch_connected();

    client.connect();
    sleep(RECONNECT_DELAY * 3 + Duration::from_millis(100)).await;

    let status = client.status().await;
    assert_eq!(status.opens_attempted, 4);
    assert_eq!(status.state, ConnectionState::Errored);
    assert!(status.reconnect_pending);
    assert!(!client.is_connected());
    assert!(!connected.has_changed().unwrap());

    transport.set_refuse(false);
    sleep(RECONNECT_DELAY).await;
    client.status().await;
    assert!(connected.has_changed().unwrap());
    assert!(*connected.borrow_and_update());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_leaves_connection_intact() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;
    let streams = Recorder::new();
    client.on("ecg_stream", listener(|_| panic!("render failed")));
    client.on("ecg_stream", streams.listener());
    let peer = transport.last_peer().unwrap();

    peer.deliver("ecg_stream", ecg(1));
    peer.deliver("ecg_stream", ecg(2));
    let status = client.status().await;

    assert_eq!(streams.len(), 2);
    assert!(status.connected);
    assert_eq!(status.opens_attempted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_is_dropped_locally() {
    let transport = LoopbackTransport::new();
    let client = connected_client(&transport).await;
    let alarms = Recorder::new();
    client.on(MessageKind::Alarm.as_str(), alarms.listener());
    let peer = transport.last_peer().unwrap();

    peer.deliver("alarm", json!({"user_id": "u9", "code": 7}));
    peer.deliver("no_such_type", json!({}));
    let status = client.status().await;

    assert!(alarms.is_empty());
    assert_eq!(client.subject(), "");
    assert!(status.connected);
}
