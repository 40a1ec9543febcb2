//! End-to-end smoke tests for the full meshbridged stack.
//!
//! Each test wires the complete bridge (memory stores, the virtual demo
//! network, real services) and drives it through a transport: the axum
//! router via `tower::ServiceExt::oneshot`, or the TCP session protocol
//! over an in-memory duplex stream. No port is bound.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tower::ServiceExt;

use meshbridge_adapter_http_axum::router;
use meshbridge_adapter_http_axum::state::AppState;
use meshbridge_adapter_memory::{MemorySettingsStore, MemoryStateStore};
use meshbridge_adapter_mqtt::{MqttConfig, MqttHandler};
use meshbridge_adapter_virtual::{VirtualButton, VirtualNetwork};
use meshbridge_app::bridge::Bridge;
use meshbridge_app::ports::FixedLogLevel;
use meshbridge_domain::device::DeviceSettings;
use meshbridge_domain::id::DeviceId;

const BULB: &str = "0x00124b0000000001";
const BUTTON: &str = "0x00124b0000000004";

/// Build a fully-wired bridge over the demo network, with the first bulb
/// named `kitchen`.
fn bridge() -> (Bridge, Arc<VirtualNetwork>) {
    let mut kitchen = DeviceSettings::new(DeviceId::new(BULB));
    kitchen.friendly_name = "kitchen".to_string();
    let settings = MemorySettingsStore::seeded([kitchen], []).expect("valid seed");
    let (network, registry) = meshbridge_adapter_virtual::demo();
    let bridge = Bridge::new(
        Arc::new(settings),
        Arc::new(MemoryStateStore::new()),
        network.clone(),
        registry,
        Arc::new(FixedLogLevel::new("info")),
    );
    bridge.devices.adopt_network_devices().expect("demo devices adopted");
    (bridge, network)
}

async fn http(bridge: &Bridge, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let resp = router::build(AppState::from_bridge(bridge))
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_ok_when_health_check_called() {
    let (bridge, _) = bridge();
    let resp = router::build(AppState::from_bridge(&bridge))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn should_list_demo_devices_with_unsupported_label() {
    let (bridge, _) = bridge();

    let (status, body) = http(&bridge, "GET", "/devices", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[BULB]["name"], json!("kitchen"));
    let unsupported = body
        .as_object()
        .unwrap()
        .values()
        .filter(|d| d["model"].as_str().is_some_and(|m| m.starts_with("[Unsupported]")))
        .count();
    assert_eq!(unsupported, 1);
}

#[tokio::test]
async fn should_set_and_read_back_state_by_friendly_name() {
    let (bridge, _) = bridge();

    let (status, _) = http(
        &bridge,
        "PUT",
        "/devices/kitchen/state",
        r#"{"state": "ON", "brightness": 80}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, state) = http(&bridge, "GET", &format!("/devices/{BULB}/state"), "").await;
    assert_eq!(state["state"], json!("ON"));
    assert_eq!(state["brightness"], json!(80));
}

#[tokio::test]
async fn should_create_group_add_member_and_recall_scene() {
    let (bridge, _) = bridge();

    let (_, created) = http(&bridge, "POST", "/groups", r#"{"name": "hall", "id": 5}"#).await;
    assert_eq!(created, json!({"id": 5}));
    let (status, _) = http(&bridge, "PUT", "/groups/hall", r#"{"devices": ["kitchen"]}"#).await;
    assert_eq!(status, StatusCode::OK);

    http(&bridge, "PUT", "/devices/kitchen/state", r#"{"state": "ON"}"#).await;
    http(&bridge, "POST", "/groups/5/scenes", r#"{"name": "evening"}"#).await;
    http(&bridge, "PUT", "/devices/kitchen/state", r#"{"state": "OFF"}"#).await;
    let (status, _) = http(&bridge, "PUT", "/groups/5/scenes/evening/recall", "").await;
    assert_eq!(status, StatusCode::OK);

    let (_, state) = http(&bridge, "GET", "/devices/kitchen/state", "").await;
    assert_eq!(state["state"], json!("ON"));
}

#[tokio::test]
async fn should_reject_unknown_path_with_bad_request() {
    let (bridge, _) = bridge();

    let (status, body) = http(&bridge, "GET", "/lights", "").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("no such command: lights"));
}

// ---------------------------------------------------------------------------
// TCP sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_push_snapshot_then_button_event_over_tcp() {
    let (bridge, network) = bridge();
    let listener_task = bridge.spawn_network_listener();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let api = Arc::clone(&bridge.api);
    let feed = bridge.feed.clone();
    let session = tokio::spawn(async move {
        meshbridge_adapter_tcp::handle_connection(server, api, &feed).await;
    });
    let mut lines = BufReader::new(client).lines();

    let snapshot: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(snapshot["path"], json!([]));
    assert_eq!(snapshot["data"]["devices"][BULB]["name"], json!("kitchen"));

    VirtualButton::press(&network, &DeviceId::new(BUTTON), "single");

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let line = lines.next_line().await.unwrap().unwrap();
            let message: Value = serde_json::from_str(&line).unwrap();
            if message["command"] == json!("publish") {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event["path"], json!(["devices", BUTTON, "event"]));
    assert_eq!(event["data"]["action"], json!("single"));

    session.abort();
    listener_task.abort();
}

#[tokio::test]
async fn should_answer_tcp_request_with_request_id() {
    let (bridge, _) = bridge();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let api = Arc::clone(&bridge.api);
    let feed = bridge.feed.clone();
    let session = tokio::spawn(async move {
        meshbridge_adapter_tcp::handle_connection(server, api, &feed).await;
    });
    let (read, mut write) = tokio::io::split(client);
    let mut lines = BufReader::new(read).lines();
    lines.next_line().await.unwrap();

    write
        .write_all(b"{\"command\": \"get\", \"path\": \"groups\", \"requestId\": \"q1\"}\n")
        .await
        .unwrap();

    let response: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(response["command"], json!("response"));
    assert_eq!(response["status"], json!("successful"));
    assert_eq!(response["requestId"], json!("q1"));
    session.abort();
}

// ---------------------------------------------------------------------------
// MQTT (broker-independent handler)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_drive_switch_endpoint_through_entity_topic() {
    let (bridge, _) = bridge();
    let handler = MqttHandler::new(&MqttConfig::default(), &bridge);

    handler
        .handle("zigbee2mqtt/0x00124b0000000003/left/set", b"ON")
        .await;

    let (_, state) = http(&bridge, "GET", "/devices/0x00124b0000000003/state", "").await;
    assert_eq!(state["state_left"], json!("ON"));
}

#[tokio::test]
async fn should_run_legacy_rename_through_bridge_config_topic() {
    let (bridge, _) = bridge();
    let handler = MqttHandler::new(&MqttConfig::default(), &bridge);

    let out = handler
        .handle(
            "zigbee2mqtt/bridge/config/rename",
            br#"{"old": "kitchen", "new": "pantry"}"#,
        )
        .await;

    assert_eq!(out[0].topic, "zigbee2mqtt/bridge/log");
    let (_, info) = http(&bridge, "GET", &format!("/devices/{BULB}"), "").await;
    assert_eq!(info["name"], json!("pantry"));
}
