//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `meshbridge.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use meshbridge_adapter_mqtt::MqttConfig;
use meshbridge_domain::device::DeviceSettings;
use meshbridge_domain::group::{GroupSettings, MemberKey};
use meshbridge_domain::id::{DeviceId, GroupId};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP and WebSocket listener.
    pub server: ServerConfig,
    /// Line-delimited JSON listener.
    pub tcp: TcpConfig,
    /// Broker connection and topic roots.
    pub mqtt: MqttConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Integration toggles.
    pub integrations: IntegrationsConfig,
    /// Per-device settings, keyed by network address.
    pub devices: BTreeMap<String, DeviceEntry>,
    /// Per-group settings, keyed by numeric group id.
    pub groups: BTreeMap<String, GroupEntry>,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Session-over-TCP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    /// Port, bound on the same host as the HTTP server.
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Per-integration toggles.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Pair the simulated demo devices on start.
    pub virtual_enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceEntry {
    pub friendly_name: Option<String>,
    pub retrieve_state: bool,
    pub options: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GroupEntry {
    pub friendly_name: Option<String>,
    /// Members as `<address>/<endpoint>`.
    pub devices: Vec<MemberKey>,
}

impl Config {
    /// Load configuration from `meshbridge.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("meshbridge.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("MESHBRIDGE_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("MESHBRIDGE_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("MESHBRIDGE_BIND")
            && let Some((host, port)) = val.rsplit_once(':')
        {
            self.server.host = host.to_string();
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(port) = var("MESHBRIDGE_TCP_PORT").and_then(|val| val.parse().ok()) {
            self.tcp.port = port;
        }
        if let Some(val) = var("MESHBRIDGE_MQTT_HOST") {
            self.mqtt.broker_host = val;
        }
        if let Some(port) = var("MESHBRIDGE_MQTT_PORT").and_then(|val| val.parse().ok()) {
            self.mqtt.broker_port = port;
        }
        if let Some(val) = var("MESHBRIDGE_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.tcp.enabled && self.tcp.port == 0 {
            return Err(ConfigError::Validation("tcp port must be non-zero".to_string()));
        }
        if self.mqtt.enabled && self.mqtt.broker_port == 0 {
            return Err(ConfigError::Validation(
                "mqtt broker port must be non-zero".to_string(),
            ));
        }
        self.group_settings().map(|_| ())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn tcp_bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.tcp.port)
    }

    /// Device records to seed the settings store with.
    #[must_use]
    pub fn device_settings(&self) -> Vec<DeviceSettings> {
        self.devices
            .iter()
            .map(|(address, entry)| {
                let mut settings = DeviceSettings::new(DeviceId::new(address.as_str()));
                if let Some(name) = &entry.friendly_name {
                    settings.friendly_name.clone_from(name);
                }
                settings.retrieve_state = entry.retrieve_state;
                settings.options.clone_from(&entry.options);
                settings
            })
            .collect()
    }

    /// Group records to seed the settings store with. Unnamed groups are
    /// called `group_<id>`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a key is not a group id.
    pub fn group_settings(&self) -> Result<Vec<GroupSettings>, ConfigError> {
        self.groups
            .iter()
            .map(|(key, entry)| {
                let id: GroupId = key.parse().map_err(|_| {
                    ConfigError::Validation(format!("group key '{key}' is not a numeric id"))
                })?;
                let name = entry
                    .friendly_name
                    .clone()
                    .unwrap_or_else(|| format!("group_{id}"));
                let mut settings = GroupSettings::new(id, name);
                settings.devices.clone_from(&entry.devices);
                Ok(settings)
            })
            .collect()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8765,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "meshbridged=info,meshbridge=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            virtual_enabled: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
