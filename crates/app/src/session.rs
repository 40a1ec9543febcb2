//! Persistent-session protocol, shared by the WebSocket and TCP transports.
//!
//! On open the client receives the whole tree as
//! `{command: "set", path: [], data}`; afterwards every path change is pushed
//! unprompted, and every inbound envelope gets exactly one response carrying
//! the client's `requestId`.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};

use meshbridge_domain::envelope::Response;
use meshbridge_domain::event::PathChange;
use meshbridge_domain::id::SessionId;

use crate::api::Api;
use crate::event_bus::PathChangeFeed;

/// `{command, path, data}` as pushed to session clients; deletes carry no data.
#[must_use]
pub fn change_message(change: &PathChange) -> Value {
    serde_json::to_value(change).unwrap_or(Value::Null)
}

fn snapshot_message(api: &Api) -> Value {
    json!({
        "command": "set",
        "path": [],
        "data": api.tree().to_value(),
    })
}

pub struct Session {
    id: SessionId,
    api: Arc<Api>,
    changes: broadcast::Receiver<PathChange>,
}

impl Session {
    /// Open a session and return it with the initial snapshot message.
    ///
    /// The change subscription is taken before the snapshot, so no change
    /// emitted in between can be missed.
    pub fn open(api: Arc<Api>, feed: &PathChangeFeed) -> (Self, Value) {
        let changes = feed.subscribe();
        let snapshot = snapshot_message(&api);
        let session = Self {
            id: SessionId::new(),
            api,
            changes,
        };
        tracing::debug!(session = %session.id, "session opened");
        (session, snapshot)
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Answer one inbound text frame.
    pub async fn handle(&self, text: &str) -> Value {
        let raw: Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(session = %self.id, %error, "unparsable message");
                return Response::failure(format!("invalid JSON: {error}")).to_envelope(None);
            }
        };
        let request_id = raw.get("requestId").cloned();
        self.api
            .call_json(&raw)
            .await
            .to_envelope(request_id.as_ref())
    }

    /// Next message to push, or `None` once the feed is closed.
    ///
    /// A client too slow to keep up is resynchronised with a fresh snapshot.
    pub async fn next_change(&mut self) -> Option<Value> {
        loop {
            match self.changes.recv().await {
                Ok(change) => return Some(change_message(&change)),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(session = %self.id, missed, "session lagged, resending snapshot");
                    return Some(snapshot_message(&self.api));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use meshbridge_domain::path::Path;

    #[tokio::test]
    async fn should_send_snapshot_on_open() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let bridge = harness.bridge();

        let (_, snapshot) = bridge.open_session();

        assert_eq!(snapshot["command"], json!("set"));
        assert_eq!(snapshot["path"], json!([]));
        assert_eq!(snapshot["data"]["devices"]["0xb1"]["name"], json!("bulb"));
    }

    #[tokio::test]
    async fn should_echo_request_id() {
        let harness = Harness::new();
        let bridge = harness.bridge();
        let (session, _) = bridge.open_session();

        let response = session
            .handle(r#"{"command": "get", "path": "devices", "requestId": 42}"#)
            .await;

        assert_eq!(response["command"], json!("response"));
        assert_eq!(response["status"], json!("successful"));
        assert_eq!(response["requestId"], json!(42));
    }

    #[tokio::test]
    async fn should_answer_garbage_with_failure() {
        let harness = Harness::new();
        let bridge = harness.bridge();
        let (session, _) = bridge.open_session();

        let response = session.handle("not json").await;

        assert_eq!(response["status"], json!("failed"));
    }

    #[tokio::test]
    async fn should_push_changes_in_emission_order() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        harness.add_device("0xb2", "BULB", "lamp");
        let bridge = harness.bridge();
        let (mut session, _) = bridge.open_session();

        for id in ["bulb", "lamp"] {
            session
                .handle(&json!({"command": "set", "path": ["devices", id, "state"], "data": {"state": "ON"}}).to_string())
                .await;
        }

        let first = session.next_change().await.unwrap();
        let second = session.next_change().await.unwrap();
        assert_eq!(first["path"], json!(["devices", "0xb1", "state"]));
        assert_eq!(second["path"], json!(["devices", "0xb2", "state"]));
        assert_eq!(first["data"], json!({"state": "ON"}));
    }

    #[tokio::test]
    async fn should_reflect_prior_changes_in_new_snapshot() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        harness.add_device("0xb2", "BULB", "lamp");
        let bridge = harness.bridge();
        for id in ["bulb", "lamp"] {
            bridge
                .api
                .call_json(&json!({"command": "set", "path": ["devices", id, "state"], "data": {"brightness": 7}}))
                .await;
        }

        let (_, snapshot) = bridge.open_session();

        for id in ["0xb1", "0xb2"] {
            assert_eq!(snapshot["data"]["devices"][id]["state"], json!({"brightness": 7}));
        }
    }

    #[test]
    fn should_omit_data_for_deletes() {
        let message = change_message(&PathChange::delete(Path::parse("groups/1")));
        assert_eq!(message, json!({"command": "delete", "path": ["groups", "1"]}));
    }
}
