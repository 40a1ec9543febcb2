//! MQTT transport configuration.

use serde::Deserialize;

/// Configuration for the MQTT transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Whether the daemon connects to a broker at all.
    pub enabled: bool,
    /// MQTT broker hostname or IP address.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// Root of the entity set/get topics and the legacy `bridge/` topics.
    pub base_topic: String,
    /// Root of the path-change publishes and the `request/<id>` topics.
    pub new_api_base_topic: String,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Drop a redundant `state: ON` sent alongside a color change.
    pub homeassistant: bool,
    /// Serve the `bridge/config/<option>` topics.
    pub legacy_api: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "meshbridge".to_string(),
            base_topic: "zigbee2mqtt".to_string(),
            new_api_base_topic: "zigbee2mqtt/api".to_string(),
            keep_alive_secs: 30,
            homeassistant: false,
            legacy_api: true,
        }
    }
}
