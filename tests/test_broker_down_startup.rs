//! Integration tests for bridge startup while the broker is down
//!
//! The bridge must come up and accept WebSocket clients even when the broker
//! is unreachable. The upstream client keeps retrying at its fixed interval
//! and client requests fail fast with the not-ready error in the meantime.

use mqtt_ws_bridge::bridge::ClientRegistry;
use mqtt_ws_bridge::config::MqttSection;
use mqtt_ws_bridge::protocol::BROKER_NOT_READY_MESSAGE;
use mqtt_ws_bridge::server::{routes, AppState};
use mqtt_ws_bridge::transport::mqtt::{ConnectionState, MqttClient};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use warp::test::WsClient;

fn unreachable_broker() -> MqttSection {
    MqttSection {
        // Nothing listens on port 1
        broker_url: "mqtt://127.0.0.1:1".to_string(),
        reconnect_interval_ms: 50,
        ..MqttSection::default()
    }
}

async fn recv_json(ws: &mut WsClient) -> Value {
    let frame = timeout(Duration::from_secs(2), ws.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("websocket closed");
    serde_json::from_str(frame.to_str().expect("text frame")).expect("json frame")
}

async fn wait_for_retry(client: &MqttClient) -> u32 {
    let mut states = client.state_receiver();
    let result = timeout(Duration::from_secs(5), async {
        loop {
            if let ConnectionState::Reconnecting(attempt) = *states.borrow_and_update() {
                return attempt;
            }
            if states.changed().await.is_err() {
                return 0;
            }
        }
    })
    .await;
    result.expect("client should enter the reconnecting state")
}

#[tokio::test]
async fn test_client_retries_when_broker_unavailable_at_startup() {
    let client = MqttClient::new(unreachable_broker()).expect("client creation should succeed");
    client.start().expect("start should succeed with the broker down");

    let attempt = wait_for_retry(&client).await;
    assert!(attempt >= 1);
    assert!(!client.is_ready());
    assert!(!client.wait_until_ready(Duration::from_millis(200)).await);

    client.disconnect().await.expect("disconnect should succeed");
    assert!(matches!(
        client.connection_state(),
        ConnectionState::Disconnected(_)
    ));
}

#[tokio::test]
async fn test_bridge_serves_clients_while_broker_down() {
    let client = MqttClient::new(unreachable_broker()).expect("client creation should succeed");
    client.start().expect("start should succeed");
    let broker = Arc::new(client);
    wait_for_retry(&broker).await;

    let registry = ClientRegistry::new();
    let filter = routes(AppState::new(registry.clone(), broker.clone()), "mqtt");
    let mut ws = warp::test::ws()
        .path("/mqtt")
        .handshake(filter)
        .await
        .expect("handshake should succeed with the broker down");

    let greeting = recv_json(&mut ws).await;
    assert_eq!(greeting["type"], "connected");

    let topic = "smarthome/room_1_left/light";
    ws.send_text(json!({"type": "subscribe", "topic": topic}).to_string())
        .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply, json!({"type": "error", "message": BROKER_NOT_READY_MESSAGE}));

    // Kept locally but never sent upstream
    assert!(registry.has_any_subscriber(topic).await);
    assert!(broker.upstream_topics().await.is_empty());
    assert!(!broker.connection_state().is_ready());

    broker.disconnect().await.expect("disconnect should succeed");
}
