//! Broker-independent handling of inbound MQTT messages.
//!
//! [`MqttHandler`] turns one `(topic, payload)` pair into the calls it
//! stands for and returns what should be published in reply. It never
//! touches the network, so every topic family is testable without a broker.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use meshbridge_app::api::Api;
use meshbridge_app::bridge::Bridge;
use meshbridge_app::commands::CommandRouter;
use meshbridge_app::legacy::{LegacyBridge, LegacyPublish};
use meshbridge_app::resolver::{Resolved, Resolver};
use meshbridge_app::services::DevicesApi;
use meshbridge_domain::envelope::{Command, Request, Response};
use meshbridge_domain::error::ValidationError;
use meshbridge_domain::path::Path;

use crate::config::MqttConfig;
use crate::error::MqttError;
use crate::topics::{EntityAction, EntityTopic, Inbound, Outbound, Topics, drop_redundant_state};

pub struct MqttHandler {
    topics: Topics,
    api: Arc<Api>,
    commands: Arc<CommandRouter>,
    legacy: Arc<LegacyBridge>,
    devices: Arc<DevicesApi>,
    resolver: Resolver,
    homeassistant: bool,
    legacy_api: bool,
}

impl MqttHandler {
    pub fn new(config: &MqttConfig, bridge: &Bridge) -> Self {
        Self {
            topics: Topics::new(&config.base_topic, &config.new_api_base_topic),
            api: Arc::clone(&bridge.api),
            commands: Arc::clone(&bridge.commands),
            legacy: Arc::clone(&bridge.legacy),
            devices: Arc::clone(&bridge.devices),
            resolver: bridge.resolver.clone(),
            homeassistant: config.homeassistant,
            legacy_api: config.legacy_api,
        }
    }

    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.topics.subscriptions(self.legacy_api)
    }

    /// Publishes due right after (re)connecting: the retained state tree,
    /// then the legacy `bridge/config` payload.
    #[must_use]
    pub fn on_connected(&self) -> Vec<Outbound> {
        let mut publishes = self.topics.tree(&self.api.tree());
        if self.legacy_api {
            publishes.push(self.topics.legacy(self.legacy.config_publish()));
        }
        publishes
    }

    /// Ask every mains-powered device for a fresh report.
    pub async fn refresh_devices(&self) {
        self.devices.refresh_powered_devices().await;
    }

    /// Handle one inbound message and return what to publish in reply.
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Vec<Outbound> {
        let Some(inbound) = self.topics.parse(topic) else {
            tracing::debug!("ignoring message on unrelated topic");
            return Vec::new();
        };
        let message = String::from_utf8_lossy(payload);
        match inbound {
            Inbound::Request { id } => vec![self.request(&id, &message).await],
            Inbound::BridgeRequest { command } => vec![self.bridge_request(&command, &message).await],
            Inbound::BridgeConfig { option } if self.legacy_api => self
                .legacy
                .handle(&option, &message)
                .await
                .into_iter()
                .map(|publish| self.topics.legacy(publish))
                .collect(),
            Inbound::BridgeConfig { .. } => Vec::new(),
            Inbound::Entity(entity) => self.entity(&entity, &message).await,
        }
    }

    async fn request(&self, id: &str, message: &str) -> Outbound {
        let mut envelope = match serde_json::from_str::<Value>(message) {
            Ok(raw) => {
                let request_id = raw.get("requestId").cloned();
                self.api
                    .call_json(&raw)
                    .await
                    .to_envelope(request_id.as_ref())
            }
            Err(error) => {
                let error = MqttError::PayloadParse(error);
                tracing::error!(%error, request = id, "unparsable request");
                Response::failure(error.to_string()).to_envelope(None)
            }
        };
        if let Value::Object(fields) = &mut envelope {
            fields.remove("command");
        }
        Outbound {
            topic: self.topics.response(id),
            payload: envelope.to_string(),
            retain: false,
        }
    }

    async fn bridge_request(&self, command: &str, message: &str) -> Outbound {
        let (response, request_id) = match parse_object(message) {
            Ok(mut data) => {
                let request_id = data.remove("requestID");
                let response = self.commands.call(command, Value::Object(data)).await;
                (response, request_id)
            }
            Err(error) => {
                tracing::error!(%error, command, "invalid request data");
                (Response::failure(error.to_string()), None)
            }
        };
        let mut result = serde_json::to_value(&response).unwrap_or_else(|_| json!({}));
        if let (Value::Object(fields), Some(id)) = (&mut result, request_id) {
            fields.insert("requestID".to_string(), id);
        }
        Outbound {
            topic: self.topics.bridge_response(command),
            payload: result.to_string(),
            retain: false,
        }
    }

    async fn entity(&self, topic: &EntityTopic, message: &str) -> Vec<Outbound> {
        let key = topic.key();
        let resolved = match self.resolver.entity(&topic.entity) {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::error!(entity = %key, %error, "entity is unknown");
                if !self.legacy_api {
                    return Vec::new();
                }
                return vec![self.topics.legacy(LegacyPublish {
                    topic: "bridge/log".to_string(),
                    payload: json!({
                        "type": "entity_not_found",
                        "message": {"friendly_name": key},
                    })
                    .to_string(),
                    retain: false,
                })];
            }
        };
        let base = match &resolved {
            Resolved::Device(device) => Path::root().join("devices").join(device.id().to_string()),
            Resolved::Group(group) => Path::root().join("groups").join(group.id().to_string()),
        };
        let mut payload = topic.payload(message);

        let request = match topic.action {
            EntityAction::Set => {
                if self.homeassistant {
                    let current = self.current_state(&base).await;
                    if drop_redundant_state(&mut payload, &current) {
                        tracing::debug!(entity = %key, "skipping state sent along with color");
                    }
                }
                Request::new(Command::Set, base.join("state"), topic.scope(payload))
            }
            EntityAction::Get => {
                let Resolved::Device(device) = &resolved else {
                    tracing::warn!(entity = %key, "groups cannot be asked for a report");
                    return Vec::new();
                };
                // A bare get asks for everything readable, within the endpoint if one is named.
                let wanted = if message.trim().is_empty() && topic.attribute.is_none() {
                    match &topic.endpoint {
                        None => None,
                        Some(_) => Some(
                            device
                                .definition
                                .as_ref()
                                .map(|def| def.readable_keys())
                                .unwrap_or_default()
                                .into_iter()
                                .map(|key| (key, Value::from("")))
                                .collect(),
                        ),
                    }
                } else {
                    Some(payload)
                };
                let attributes = match wanted {
                    None => Value::Bool(true),
                    Some(payload) => topic
                        .scope(payload)
                        .into_iter()
                        .map(|(key, _)| Value::from(key))
                        .collect(),
                };
                let mut data = Map::new();
                data.insert("force_update".to_string(), attributes);
                Request::new(Command::Set, base, data)
            }
        };
        let response = self.api.call(request).await;
        if let Some(error) = response.error {
            tracing::warn!(entity = %key, %error, "entity request failed");
        }
        Vec::new()
    }

    async fn current_state(&self, base: &Path) -> Map<String, Value> {
        let request = Request::new(Command::Get, base.join("state"), Map::new());
        match self.api.execute(&request).await {
            Ok(Some(Value::Object(state))) => state,
            _ => Map::new(),
        }
    }
}

/// Parse a request body: blank is `{}`, anything but an object is refused.
fn parse_object(message: &str) -> Result<Map<String, Value>, MqttError> {
    if message.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(message).map_err(MqttError::PayloadParse)? {
        Value::Object(map) => Ok(map),
        _ => Err(MqttError::Domain(ValidationError::DataNotObject.into())),
    }
}
