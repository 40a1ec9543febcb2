//! Topic layout: which inbound topics mean what, and where outbound
//! messages go.
//!
//! Two roots are in play. `base` carries the entity set/get topics and the
//! legacy `bridge/...` topics; `new_base` carries one retained topic per
//! namespace path plus the `request/<id>` / `response/<id>` pair.

use serde_json::{Map, Value};

use meshbridge_app::legacy::LegacyPublish;
use meshbridge_domain::endpoint::{is_endpoint_name, with_endpoint_suffix};
use meshbridge_domain::event::PathChange;
use meshbridge_domain::tree::StateTree;

/// Deepest friendly name (in `/`-separated levels) reachable through the
/// entity set/get subscriptions.
pub const ENTITY_TOPIC_DEPTH: usize = 8;

/// A message ready to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    Get,
    Set,
}

/// `<base>/<entity>[/<endpoint>]/(get|set)[/<attribute>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTopic {
    pub entity: String,
    pub endpoint: Option<String>,
    pub action: EntityAction,
    pub attribute: Option<String>,
}

impl EntityTopic {
    /// Friendly name with the endpoint re-attached, as used in log messages.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{endpoint}", self.entity),
            None => self.entity.clone(),
        }
    }

    /// Convert the raw message into an attribute payload.
    ///
    /// With an attribute segment the message is that attribute's value. A
    /// JSON object is used as is. Anything else is taken as a bare `state`.
    #[must_use]
    pub fn payload(&self, message: &str) -> Map<String, Value> {
        let mut payload = Map::new();
        if let Some(attribute) = &self.attribute {
            let value = serde_json::from_str(message).unwrap_or_else(|_| Value::from(message));
            payload.insert(attribute.clone(), value);
        } else {
            match serde_json::from_str::<Value>(message) {
                Ok(Value::Object(map)) => payload = map,
                _ => {
                    payload.insert("state".to_string(), Value::from(message));
                }
            }
        }
        payload
    }

    /// Suffix every key with the topic's endpoint, if any.
    #[must_use]
    pub fn scope(&self, payload: Map<String, Value>) -> Map<String, Value> {
        match &self.endpoint {
            Some(endpoint) => payload
                .into_iter()
                .map(|(key, value)| (with_endpoint_suffix(&key, endpoint), value))
                .collect(),
            None => payload,
        }
    }
}

/// Home Assistant sends `state` with every color change. When the entity is
/// already on and brightness is not part of the payload the state write is
/// redundant and gets dropped.
///
/// Returns whether `state` was removed.
pub fn drop_redundant_state(payload: &mut Map<String, Value>, current: &Map<String, Value>) -> bool {
    let is_on = current.get("state").and_then(Value::as_str) == Some("ON");
    let sets_color = payload.contains_key("color") || payload.contains_key("color_temp");
    if is_on && sets_color && !payload.contains_key("brightness") {
        return payload.remove("state").is_some();
    }
    false
}

/// What an inbound topic addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `<new_base>/request/<id>`: an envelope request.
    Request { id: String },
    /// `<base>/bridge/request/<command>`: a command-router call.
    BridgeRequest { command: String },
    /// `<base>/bridge/config/<option>`: a legacy option.
    BridgeConfig { option: String },
    Entity(EntityTopic),
}

#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
    new_base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>, new_base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            new_base: new_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Every filter the client subscribes to after connecting.
    #[must_use]
    pub fn subscriptions(&self, legacy_api: bool) -> Vec<String> {
        let mut filters = vec![
            format!("{}/request/#", self.new_base),
            format!("{}/bridge/request/#", self.base),
        ];
        if legacy_api {
            filters.push(format!("{}/bridge/config/+", self.base));
            filters.push(format!("{}/bridge/config/+/+", self.base));
        }
        for depth in 1..=ENTITY_TOPIC_DEPTH {
            let prefix = format!("{}/{}", self.base, "+/".repeat(depth));
            for action in ["set", "get"] {
                filters.push(format!("{prefix}{action}"));
                filters.push(format!("{prefix}{action}/+"));
            }
        }
        filters
    }

    /// Classify an inbound topic. Topics outside both roots, and our own
    /// publishes echoed back, yield `None`.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<Inbound> {
        if let Some(rest) = strip(topic, &self.new_base) {
            return rest
                .strip_prefix("request/")
                .filter(|id| !id.is_empty())
                .map(|id| Inbound::Request { id: id.to_string() });
        }
        let rest = strip(topic, &self.base)?;
        if let Some(command) = rest.strip_prefix("bridge/request/") {
            return Some(Inbound::BridgeRequest {
                command: command.to_string(),
            });
        }
        if let Some(option) = rest.strip_prefix("bridge/config/") {
            return Some(Inbound::BridgeConfig {
                option: option.to_string(),
            });
        }
        parse_entity(rest).map(Inbound::Entity)
    }

    /// Where a path change is published, relative to `new_base`.
    ///
    /// Deletes carry an empty payload so the retained topic is cleared;
    /// ephemeral publishes are not retained.
    #[must_use]
    pub fn change(&self, change: &PathChange) -> Outbound {
        let payload = change
            .data
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        Outbound {
            topic: self.under_new_base(&change.path.to_string()),
            payload,
            retain: change.is_retained(),
        }
    }

    /// One retained publish per unit of the flattened tree.
    #[must_use]
    pub fn tree(&self, tree: &StateTree) -> Vec<Outbound> {
        tree.flatten()
            .into_iter()
            .map(|(path, value)| Outbound {
                topic: self.under_new_base(&path.to_string()),
                payload: value.to_string(),
                retain: true,
            })
            .collect()
    }

    #[must_use]
    pub fn response(&self, request_id: &str) -> String {
        format!("{}/response/{request_id}", self.new_base)
    }

    #[must_use]
    pub fn bridge_response(&self, command: &str) -> String {
        format!("{}/bridge/response/{command}", self.base)
    }

    #[must_use]
    pub fn legacy(&self, publish: LegacyPublish) -> Outbound {
        Outbound {
            topic: format!("{}/{}", self.base, publish.topic),
            payload: publish.payload,
            retain: publish.retain,
        }
    }

    fn under_new_base(&self, path: &str) -> String {
        if path.is_empty() {
            self.new_base.clone()
        } else {
            format!("{}/{path}", self.new_base)
        }
    }
}

fn strip<'a>(topic: &'a str, root: &str) -> Option<&'a str> {
    topic.strip_prefix(root)?.strip_prefix('/')
}

fn parse_entity(rest: &str) -> Option<EntityTopic> {
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.first() == Some(&"bridge") {
        return None;
    }
    let at = segments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, segment)| matches!(**segment, "get" | "set"))
        .map(|(index, _)| index)?;
    let action = if segments[at] == "set" {
        EntityAction::Set
    } else {
        EntityAction::Get
    };
    let mut name = &segments[..at];
    let mut endpoint = None;
    if let [head @ .., last] = name
        && !head.is_empty()
        && is_endpoint_name(last)
    {
        endpoint = Some((*last).to_string());
        name = head;
    }
    let attribute = segments[at + 1..].join("/");
    Some(EntityTopic {
        entity: name.join("/"),
        endpoint,
        action,
        attribute: (!attribute.is_empty()).then_some(attribute),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use meshbridge_domain::path::Path;

    fn topics() -> Topics {
        Topics::new("zigbee2mqtt", "zigbee2mqtt/api")
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn entity(topic: &str) -> EntityTopic {
        match topics().parse(topic) {
            Some(Inbound::Entity(entity)) => entity,
            other => panic!("expected entity topic, got {other:?}"),
        }
    }

    #[test]
    fn should_parse_request_topic_before_entity_topics() {
        assert_eq!(
            topics().parse("zigbee2mqtt/api/request/abc"),
            Some(Inbound::Request { id: "abc".into() })
        );
    }

    #[test]
    fn should_ignore_own_path_publishes() {
        assert_eq!(topics().parse("zigbee2mqtt/api/devices/0x01/state"), None);
        assert_eq!(topics().parse("zigbee2mqtt/api/request/"), None);
    }

    #[test]
    fn should_parse_bridge_topics() {
        assert_eq!(
            topics().parse("zigbee2mqtt/bridge/request/device/remove"),
            Some(Inbound::BridgeRequest {
                command: "device/remove".into()
            })
        );
        assert_eq!(
            topics().parse("zigbee2mqtt/bridge/config/touchlink/factory_reset"),
            Some(Inbound::BridgeConfig {
                option: "touchlink/factory_reset".into()
            })
        );
    }

    #[test]
    fn should_not_treat_bridge_topics_as_entities() {
        assert_eq!(topics().parse("zigbee2mqtt/bridge/state/set"), None);
    }

    #[test]
    fn should_parse_plain_set_topic() {
        let topic = entity("zigbee2mqtt/lamp/set");
        assert_eq!(topic.entity, "lamp");
        assert_eq!(topic.endpoint, None);
        assert_eq!(topic.action, EntityAction::Set);
        assert_eq!(topic.attribute, None);
    }

    #[test]
    fn should_parse_endpoint_and_attribute() {
        let topic = entity("zigbee2mqtt/hall/switch/right/get/state");
        assert_eq!(topic.entity, "hall/switch");
        assert_eq!(topic.endpoint.as_deref(), Some("right"));
        assert_eq!(topic.action, EntityAction::Get);
        assert_eq!(topic.attribute.as_deref(), Some("state"));
        assert_eq!(topic.key(), "hall/switch/right");
    }

    #[test]
    fn should_keep_endpoint_word_as_name_when_it_is_the_only_segment() {
        let topic = entity("zigbee2mqtt/left/set");
        assert_eq!(topic.entity, "left");
        assert_eq!(topic.endpoint, None);
    }

    #[test]
    fn should_ignore_topics_without_action() {
        assert_eq!(topics().parse("zigbee2mqtt/lamp"), None);
        assert_eq!(topics().parse("zigbee2mqtt/set"), None);
        assert_eq!(topics().parse("elsewhere/lamp/set"), None);
    }

    #[test]
    fn should_treat_non_json_message_as_state() {
        let topic = entity("zigbee2mqtt/lamp/set");
        assert_eq!(topic.payload("ON"), obj(json!({"state": "ON"})));
        assert_eq!(
            topic.payload(r#"{"brightness": 20}"#),
            obj(json!({"brightness": 20}))
        );
    }

    #[test]
    fn should_use_attribute_segment_as_key() {
        let topic = entity("zigbee2mqtt/lamp/set/brightness");
        assert_eq!(topic.payload("120"), obj(json!({"brightness": 120})));
        assert_eq!(topic.payload("high"), obj(json!({"brightness": "high"})));
    }

    #[test]
    fn should_suffix_keys_with_endpoint() {
        let topic = entity("zigbee2mqtt/switch/left/set");
        let payload = topic.scope(topic.payload("OFF"));
        assert_eq!(payload, obj(json!({"state_left": "OFF"})));
    }

    #[test]
    fn should_drop_state_for_color_change_on_lit_entity() {
        let mut payload = obj(json!({"state": "ON", "color_temp": 300}));
        assert!(drop_redundant_state(&mut payload, &obj(json!({"state": "ON"}))));
        assert_eq!(payload, obj(json!({"color_temp": 300})));
    }

    #[test]
    fn should_keep_state_when_brightness_is_set_or_entity_is_off() {
        let mut with_brightness = obj(json!({"state": "ON", "color_temp": 300, "brightness": 3}));
        assert!(!drop_redundant_state(&mut with_brightness, &obj(json!({"state": "ON"}))));

        let mut while_off = obj(json!({"state": "ON", "color": "#ff0000"}));
        assert!(!drop_redundant_state(&mut while_off, &obj(json!({"state": "OFF"}))));
        assert!(while_off.contains_key("state"));
    }

    #[test]
    fn should_map_path_changes_to_retained_topics() {
        let set = topics().change(&PathChange::set(
            Path::parse("devices/0x01/state"),
            json!({"state": "ON"}),
        ));
        assert_eq!(set.topic, "zigbee2mqtt/api/devices/0x01/state");
        assert_eq!(set.payload, r#"{"state":"ON"}"#);
        assert!(set.retain);

        let delete = topics().change(&PathChange::delete(Path::parse("groups/3")));
        assert_eq!(delete.payload, "");
        assert!(delete.retain);
    }

    #[test]
    fn should_not_retain_ephemeral_publishes() {
        let event = topics().change(&PathChange::publish(
            Path::parse("devices/0x04/event"),
            json!({"action": "single"}),
        ));
        assert!(!event.retain);
    }

    #[test]
    fn should_publish_opaque_units_of_tree() {
        let mut device = StateTree::opaque();
        device.insert("name", json!("lamp"));
        let mut devices = StateTree::new();
        devices.insert("0x01", device);
        let mut root = StateTree::new();
        root.insert("devices", devices);

        let publishes = topics().tree(&root);

        assert_eq!(
            publishes,
            vec![Outbound {
                topic: "zigbee2mqtt/api/devices/0x01".into(),
                payload: r#"{"name":"lamp"}"#.into(),
                retain: true,
            }]
        );
    }

    #[test]
    fn should_subscribe_to_legacy_config_only_when_enabled() {
        let with = topics().subscriptions(true);
        let without = topics().subscriptions(false);
        assert!(with.contains(&"zigbee2mqtt/bridge/config/+".to_string()));
        assert!(!without.iter().any(|f| f.contains("bridge/config")));
        assert!(without.contains(&"zigbee2mqtt/api/request/#".to_string()));
        assert!(without.contains(&"zigbee2mqtt/+/+/set/+".to_string()));
    }
}
