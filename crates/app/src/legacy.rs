//! Legacy bridge options: the flat `bridge/config/<option>` topics.
//!
//! Each option is translated into one or more envelope calls on the [`Api`]
//! (or a direct network call for the few options without a namespace
//! counterpart). Handlers never fail: problems are logged and reported on
//! `bridge/log`, the way clients of this surface expect.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value, json};

use meshbridge_domain::device::RemoveMode;
use meshbridge_domain::envelope::{Command, Request, Response};
use meshbridge_domain::event::{BusEvent, EventKind};
use meshbridge_domain::path::Path;

use crate::api::{Api, Namespace};
use crate::event_bus::EventBus;
use crate::ports::LogLevelControl;
use crate::resolver::{Resolved, Resolver};

/// A message the transport should publish, relative to its base topic.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPublish {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl LegacyPublish {
    fn log(kind: &str, message: Value) -> Self {
        Self {
            topic: "bridge/log".to_string(),
            payload: json!({ "type": kind, "message": message }).to_string(),
            retain: false,
        }
    }

    fn log_with_meta(kind: &str, message: &str, meta: Value) -> Self {
        Self {
            topic: "bridge/log".to_string(),
            payload: json!({ "type": kind, "message": message, "meta": meta }).to_string(),
            retain: false,
        }
    }
}

/// Options accepted under `bridge/config/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyOption {
    PermitJoin,
    LogLevel,
    Reset,
    Devices,
    DevicesGet,
    Groups,
    Rename,
    RenameLast,
    Remove(RemoveMode),
    DeviceOptions,
    AddGroup,
    RemoveGroup,
    Whitelist,
    TouchlinkFactoryReset,
}

impl FromStr for LegacyOption {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "permit_join" => Self::PermitJoin,
            "log_level" => Self::LogLevel,
            "reset" => Self::Reset,
            "devices" => Self::Devices,
            "devices/get" => Self::DevicesGet,
            "groups" => Self::Groups,
            "rename" => Self::Rename,
            "rename_last" => Self::RenameLast,
            "remove" => Self::Remove(RemoveMode::Remove),
            "force_remove" => Self::Remove(RemoveMode::ForceRemove),
            "ban" => Self::Remove(RemoveMode::Ban),
            "device_options" => Self::DeviceOptions,
            "add_group" => Self::AddGroup,
            "remove_group" => Self::RemoveGroup,
            "whitelist" => Self::Whitelist,
            "touchlink/factory_reset" => Self::TouchlinkFactoryReset,
            _ => return Err(()),
        })
    }
}

/// Past-tense label used in `device_<label>` log types.
fn removal_label(mode: RemoveMode) -> &'static str {
    match mode {
        RemoveMode::Remove => "removed",
        RemoveMode::ForceRemove => "force_removed",
        RemoveMode::Ban => "banned",
    }
}

pub struct LegacyBridge {
    api: Arc<Api>,
    resolver: Resolver,
    log_level: Arc<dyn LogLevelControl>,
    last_joined: Arc<Mutex<Option<String>>>,
}

impl LegacyBridge {
    /// Create the bridge and start tracking the last joined device on `bus`.
    pub fn new(
        api: Arc<Api>,
        resolver: Resolver,
        log_level: Arc<dyn LogLevelControl>,
        bus: &EventBus,
    ) -> Self {
        let last_joined = Arc::new(Mutex::new(None));
        let tracked = Arc::clone(&last_joined);
        let settings = Arc::clone(resolver.settings());
        bus.subscribe(EventKind::DeviceAdded, move |event| {
            if let BusEvent::DeviceAdded { device } = event {
                let name = settings
                    .device(device)
                    .map_or_else(|| device.to_string(), |s| s.friendly_name);
                *tracked.lock().unwrap_or_else(PoisonError::into_inner) = Some(name);
            }
            Ok(())
        });
        Self {
            api,
            resolver,
            log_level,
            last_joined,
        }
    }

    /// `bridge/config`, published retained on connect and after changes.
    #[must_use]
    pub fn config_payload(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "log_level": self.log_level.level(),
            "permit_join": self.resolver.network().permit_join_enabled(),
        })
    }

    #[must_use]
    pub fn config_publish(&self) -> LegacyPublish {
        LegacyPublish {
            topic: "bridge/config".to_string(),
            payload: self.config_payload().to_string(),
            retain: true,
        }
    }

    /// Handle `bridge/config/<option>` with a raw text `message`.
    ///
    /// Returns what should be published in response. Unknown options yield
    /// nothing.
    #[tracing::instrument(skip(self, message))]
    pub async fn handle(&self, option: &str, message: &str) -> Vec<LegacyPublish> {
        let Ok(option) = option.parse::<LegacyOption>() else {
            tracing::debug!(option, "unsupported legacy option");
            return Vec::new();
        };
        match option {
            LegacyOption::PermitJoin => {
                let enabled = message.eq_ignore_ascii_case("true");
                if let Err(error) = self.resolver.network().permit_join(enabled).await {
                    tracing::error!(%error, "failed to change permit join");
                }
                vec![self.config_publish()]
            }
            LegacyOption::LogLevel => {
                match self.log_level.set_level(message) {
                    Ok(()) => tracing::info!(level = %message.to_ascii_lowercase(), "switched log level"),
                    Err(error) => tracing::error!(%error, "failed to switch log level"),
                }
                vec![self.config_publish()]
            }
            LegacyOption::Reset => {
                match self.resolver.network().reset().await {
                    Ok(()) => tracing::info!("soft reset coordinator"),
                    Err(error) => tracing::error!(%error, "soft reset failed"),
                }
                Vec::new()
            }
            LegacyOption::Devices | LegacyOption::DevicesGet => {
                let devices = self.device_list();
                if option == LegacyOption::DevicesGet {
                    vec![LegacyPublish {
                        topic: "bridge/config/devices".to_string(),
                        payload: devices.to_string(),
                        retain: false,
                    }]
                } else {
                    vec![LegacyPublish::log("devices", devices)]
                }
            }
            LegacyOption::Groups => {
                let groups: Vec<Value> = self
                    .resolver
                    .groups()
                    .into_iter()
                    .map(|g| json!(g.settings))
                    .collect();
                vec![LegacyPublish::log("groups", Value::Array(groups))]
            }
            LegacyOption::Rename => self.rename(message).await,
            LegacyOption::RenameLast => self.rename_last(message).await,
            LegacyOption::Remove(mode) => self.remove(message.trim(), mode).await,
            LegacyOption::DeviceOptions => self.device_options(message).await,
            LegacyOption::AddGroup => self.add_group(message).await,
            LegacyOption::RemoveGroup => {
                let response = self
                    .call(Command::Delete, &[Namespace::Groups.as_str(), message], Map::new())
                    .await;
                if response.is_success() {
                    vec![LegacyPublish::log("group_removed", Value::from(message))]
                } else {
                    Vec::new()
                }
            }
            LegacyOption::Whitelist => {
                let mut data = Map::new();
                data.insert("whitelist".to_string(), Value::Bool(true));
                self.call(Command::Set, &[Namespace::Devices.as_str(), message], data)
                    .await;
                Vec::new()
            }
            LegacyOption::TouchlinkFactoryReset => self.touchlink_factory_reset().await,
        }
    }

    async fn call(&self, command: Command, path: &[&str], data: Map<String, Value>) -> Response {
        let path: Path = path.iter().copied().collect();
        self.api.call(Request::new(command, path, data)).await
    }

    fn device_list(&self) -> Value {
        let network = self.resolver.network();
        let devices: Vec<Value> = network
            .devices()
            .into_iter()
            .map(|info| {
                if info.is_coordinator() {
                    return json!({
                        "ieeeAddr": info.id,
                        "type": info.kind,
                        "friendly_name": "Coordinator",
                    });
                }
                let definition = self.resolver.registry().find_by_device(&info);
                let name = self
                    .resolver
                    .settings()
                    .device(&info.id)
                    .map_or_else(|| info.id.to_string(), |s| s.friendly_name);
                json!({
                    "ieeeAddr": info.id,
                    "type": info.kind,
                    "friendly_name": name,
                    "model": definition.as_ref().map_or_else(|| info.model_id.clone().unwrap_or_default(), |d| d.model.clone()),
                    "vendor": definition.as_ref().map_or("-", |d| d.vendor.as_str()),
                    "description": definition.as_ref().map_or("-", |d| d.description.as_str()),
                    "manufacturerName": info.manufacturer_name,
                    "powerSource": info.power_source,
                    "modelID": info.model_id,
                    "lastSeen": info.last_seen.map(meshbridge_domain::time::epoch_millis),
                })
            })
            .collect();
        Value::Array(devices)
    }

    async fn rename(&self, message: &str) -> Vec<LegacyPublish> {
        let parsed: Option<(String, String)> = serde_json::from_str::<Value>(message)
            .ok()
            .and_then(|json| {
                let old = json.get("old")?.as_str()?.to_string();
                let new = json.get("new")?.as_str()?.to_string();
                Some((old, new))
            });
        let entity = parsed
            .as_ref()
            .and_then(|(old, _)| self.resolver.entity(old).ok());
        let (Some((old, new)), Some(entity)) = (parsed, entity) else {
            tracing::error!(
                message,
                r#"invalid rename message, expected {{"old": "friendly_name", "new": "new_name"}}"#
            );
            return Vec::new();
        };
        let (namespace, kind) = match entity {
            Resolved::Device(_) => (Namespace::Devices, "device_renamed"),
            Resolved::Group(_) => (Namespace::Groups, "group_renamed"),
        };
        let mut data = Map::new();
        data.insert("name".to_string(), Value::from(new.as_str()));
        let response = self.call(Command::Set, &[namespace.as_str(), &old], data).await;
        if response.is_success() {
            vec![LegacyPublish::log(kind, json!({ "from": old, "to": new }))]
        } else {
            Vec::new()
        }
    }

    async fn rename_last(&self, name: &str) -> Vec<LegacyPublish> {
        let last = self
            .last_joined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(last) = last else {
            tracing::error!("cannot rename last joined device, no device has joined during this session");
            return Vec::new();
        };
        let mut data = Map::new();
        data.insert("name".to_string(), Value::from(name));
        let response = self
            .call(Command::Set, &[Namespace::Devices.as_str(), &last], data)
            .await;
        if response.is_success() {
            *self.last_joined.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
            vec![LegacyPublish::log("device_renamed", json!({ "from": last, "to": name }))]
        } else {
            Vec::new()
        }
    }

    async fn remove(&self, device: &str, mode: RemoveMode) -> Vec<LegacyPublish> {
        let mut data = Map::new();
        data.insert("mode".to_string(), Value::from(mode.as_str()));
        let response = self
            .call(Command::Delete, &[Namespace::Devices.as_str(), device], data)
            .await;
        let label = removal_label(mode);
        let kind = if response.is_success() {
            format!("device_{label}")
        } else {
            format!("device_{label}_failed")
        };
        vec![LegacyPublish::log(&kind, Value::from(device))]
    }

    async fn device_options(&self, message: &str) -> Vec<LegacyPublish> {
        let Ok(Value::Object(mut json)) = serde_json::from_str::<Value>(message) else {
            tracing::error!(message, "failed to parse device options as a JSON object");
            return Vec::new();
        };
        let (Some(Value::String(name)), Some(options)) =
            (json.remove("friendly_name"), json.remove("options"))
        else {
            tracing::error!(r#"invalid device options, should contain "friendly_name" and "options""#);
            return Vec::new();
        };
        let mut data = Map::new();
        data.insert("options".to_string(), options);
        self.call(Command::Set, &[Namespace::Devices.as_str(), &name], data)
            .await;
        Vec::new()
    }

    async fn add_group(&self, message: &str) -> Vec<LegacyPublish> {
        let mut data = Map::new();
        match serde_json::from_str::<Value>(message) {
            Ok(Value::Object(json)) => {
                if let Some(id) = json.get("id") {
                    let label = id.as_str().map_or_else(|| id.to_string(), str::to_string);
                    data.insert("id".to_string(), id.clone());
                    data.insert("name".to_string(), Value::from(format!("group_{label}")));
                }
                if let Some(name) = json.get("friendly_name") {
                    data.insert("name".to_string(), name.clone());
                }
            }
            _ => {
                data.insert("name".to_string(), Value::from(message));
            }
        }
        let Some(name) = data.get("name").cloned() else {
            tracing::error!("failed to add group, missing friendly_name");
            return Vec::new();
        };
        let response = self
            .call(Command::Create, &[Namespace::Groups.as_str()], data)
            .await;
        if response.is_success() {
            vec![LegacyPublish::log("group_added", name)]
        } else {
            Vec::new()
        }
    }

    async fn touchlink_factory_reset(&self) -> Vec<LegacyPublish> {
        tracing::info!("starting touchlink factory reset");
        let mut out = vec![LegacyPublish::log_with_meta(
            "touchlink",
            "reset_started",
            json!({ "status": "started" }),
        )];
        let (message, status) = match self.resolver.network().touchlink_factory_reset().await {
            Ok(true) => {
                tracing::info!("factory reset device through touchlink");
                ("reset_success", "success")
            }
            Ok(false) => {
                tracing::warn!("no device answered the touchlink factory reset");
                ("reset_failed", "failed")
            }
            Err(error) => {
                tracing::error!(%error, "touchlink factory reset failed");
                ("reset_failed", "failed")
            }
        };
        out.push(LegacyPublish::log_with_meta(
            "touchlink",
            message,
            json!({ "status": status }),
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SettingsStore;
    use crate::test_support::Harness;
    use meshbridge_domain::device::DeviceInfo;
    use meshbridge_domain::id::{DeviceId, GroupId};

    fn log_types(publishes: &[LegacyPublish]) -> Vec<String> {
        publishes
            .iter()
            .map(|p| {
                serde_json::from_str::<Value>(&p.payload).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn should_toggle_permit_join_and_republish_config() {
        let harness = Harness::new();
        let legacy = harness.bridge().legacy;

        let out = legacy.handle("permit_join", "TRUE").await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, "bridge/config");
        assert!(out[0].retain);
        let config: Value = serde_json::from_str(&out[0].payload).unwrap();
        assert_eq!(config["permit_join"], json!(true));
    }

    #[tokio::test]
    async fn should_switch_log_level_and_ignore_invalid_one() {
        let harness = Harness::new();
        let legacy = harness.bridge().legacy;

        legacy.handle("log_level", "DEBUG").await;
        legacy.handle("log_level", "verbose").await;

        assert_eq!(legacy.config_payload()["log_level"], json!("debug"));
    }

    #[tokio::test]
    async fn should_rename_through_api() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let legacy = harness.bridge().legacy;

        let out = legacy
            .handle("rename", r#"{"old": "bulb", "new": "lamp"}"#)
            .await;

        assert_eq!(harness.device_name("0xb1"), "lamp");
        assert_eq!(log_types(&out), ["device_renamed"]);
    }

    #[tokio::test]
    async fn should_ignore_malformed_rename() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let legacy = harness.bridge().legacy;

        let out = legacy.handle("rename", "bulb -> lamp").await;

        assert!(out.is_empty());
        assert_eq!(harness.device_name("0xb1"), "bulb");
    }

    #[tokio::test]
    async fn should_rename_last_joined_device() {
        let harness = Harness::new();
        let bridge = harness.bridge();
        let info = DeviceInfo::new("0xnew").with_model("BULB");
        harness.network.add(info.clone());
        bridge.devices.on_device_joined(info).await.unwrap();

        bridge.legacy.handle("rename_last", "porch").await;

        assert_eq!(harness.device_name("0xnew"), "porch");
    }

    #[tokio::test]
    async fn should_report_failed_removal_on_bridge_log() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        harness.network.fail_leave(true);
        let legacy = harness.bridge().legacy;

        let failed = legacy.handle("remove", "bulb").await;
        let forced = legacy.handle("force_remove", "bulb").await;

        assert_eq!(log_types(&failed), ["device_removed_failed"]);
        assert_eq!(log_types(&forced), ["device_force_removed"]);
        assert!(harness.settings.device(&DeviceId::new("0xb1")).is_none());
    }

    #[tokio::test]
    async fn should_ban_device() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let legacy = harness.bridge().legacy;

        legacy.handle("ban", "bulb").await;

        assert!(harness.settings.is_banned(&DeviceId::new("0xb1")));
    }

    #[tokio::test]
    async fn should_add_group_from_plain_name_or_json() {
        let harness = Harness::new();
        let legacy = harness.bridge().legacy;

        legacy.handle("add_group", "hall").await;
        legacy.handle("add_group", r#"{"id": 12}"#).await;

        assert_eq!(harness.settings.group(GroupId::new(1)).unwrap().friendly_name, "hall");
        assert_eq!(
            harness.settings.group(GroupId::new(12)).unwrap().friendly_name,
            "group_12"
        );
    }

    #[tokio::test]
    async fn should_store_device_options() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let legacy = harness.bridge().legacy;

        legacy
            .handle(
                "device_options",
                r#"{"friendly_name": "bulb", "options": {"transition": 2}}"#,
            )
            .await;

        let settings = harness.settings.device(&DeviceId::new("0xb1")).unwrap();
        assert_eq!(settings.options.get("transition"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn should_whitelist_device() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let legacy = harness.bridge().legacy;

        legacy.handle("whitelist", "bulb").await;

        assert!(harness.settings.device(&DeviceId::new("0xb1")).unwrap().whitelisted);
    }

    #[tokio::test]
    async fn should_report_touchlink_outcome() {
        let harness = Harness::new();
        harness.network.touchlink_answers(true);
        let legacy = harness.bridge().legacy;

        let out = legacy.handle("touchlink/factory_reset", "").await;

        let messages: Vec<String> = out
            .iter()
            .map(|p| serde_json::from_str::<Value>(&p.payload).unwrap()["message"].to_string())
            .collect();
        assert_eq!(messages, [r#""reset_started""#, r#""reset_success""#]);
    }

    #[tokio::test]
    async fn should_list_devices_on_config_topic_for_get() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "bulb");
        let legacy = harness.bridge().legacy;

        let out = legacy.handle("devices/get", "").await;

        assert_eq!(out[0].topic, "bridge/config/devices");
        let devices: Value = serde_json::from_str(&out[0].payload).unwrap();
        assert_eq!(devices[0]["friendly_name"], json!("bulb"));
        assert_eq!(devices[0]["vendor"], json!("Acme"));
    }

    #[tokio::test]
    async fn should_soft_reset_and_ignore_unknown_options() {
        let harness = Harness::new();
        let legacy = harness.bridge().legacy;

        legacy.handle("reset", "").await;
        let out = legacy.handle("elapsed", "true").await;

        assert_eq!(harness.network.resets(), 1);
        assert!(out.is_empty());
    }
}
