//! Device: a node on the control network, plus its persisted settings record.
//!
//! [`DeviceInfo`] is what the network reports (address, type, model, power
//! source, endpoints). [`DeviceSettings`] is what the user configured
//! (friendly name, options, polling). The two are joined by [`DeviceId`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, ValidationError};
use crate::id::DeviceId;
use crate::time::Timestamp;

/// Role of a node in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Coordinator,
    Router,
    EndDevice,
}

/// How the node is powered. Battery nodes sleep and cannot be polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSource {
    #[serde(rename = "Mains (single phase)")]
    Mains,
    #[serde(rename = "Battery")]
    Battery,
    #[serde(rename = "DC Source")]
    Dc,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

/// Network-reported facts about a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub model_id: Option<String>,
    pub manufacturer_name: Option<String>,
    pub power_source: PowerSource,
    /// Numeric endpoint ids exposed by the device, primary first.
    pub endpoints: Vec<u8>,
    pub last_seen: Option<Timestamp>,
}

impl DeviceInfo {
    /// Create a router-type device with a single endpoint `1`.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Router,
            model_id: None,
            manufacturer_name: None,
            power_source: PowerSource::Unknown,
            endpoints: vec![1],
            last_seen: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer_name: impl Into<String>) -> Self {
        self.manufacturer_name = Some(manufacturer_name.into());
        self
    }

    #[must_use]
    pub fn with_power_source(mut self, power_source: PowerSource) -> Self {
        self.power_source = power_source;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Vec<u8>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Endpoint used when a command carries no endpoint override.
    #[must_use]
    pub fn primary_endpoint(&self) -> Option<u8> {
        self.endpoints.first().copied()
    }

    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.kind == DeviceKind::Coordinator
    }

    #[must_use]
    pub fn is_battery_powered(&self) -> bool {
        self.power_source == PowerSource::Battery
    }
}

/// Persisted, user-editable record for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub id: DeviceId,
    pub friendly_name: String,
    /// Read state back after a set when the device does not report on its own.
    #[serde(default)]
    pub retrieve_state: bool,
    #[serde(default)]
    pub whitelisted: bool,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl DeviceSettings {
    /// A fresh record whose friendly name defaults to the network address.
    #[must_use]
    pub fn new(id: DeviceId) -> Self {
        Self {
            friendly_name: id.to_string(),
            id,
            retrieve_state: false,
            whitelisted: false,
            options: Map::new(),
        }
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when `friendly_name` is empty.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.friendly_name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(())
    }
}

/// How a device leaves the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveMode {
    /// Ask the device to leave, clean up only on success.
    #[default]
    Remove,
    /// Drop the local record without contacting the device.
    ForceRemove,
    /// Remove, then refuse any future rejoin.
    Ban,
}

impl RemoveMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::ForceRemove => "force_remove",
            Self::Ban => "ban",
        }
    }

    /// Whether the network must acknowledge a leave before cleanup.
    #[must_use]
    pub fn contacts_device(self) -> bool {
        !matches!(self, Self::ForceRemove)
    }
}

impl fmt::Display for RemoveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoveMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remove" => Ok(Self::Remove),
            "force_remove" => Ok(Self::ForceRemove),
            "ban" => Ok(Self::Ban),
            other => Err(ValidationError::InvalidRemoveMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_friendly_name_to_address() {
        let settings = DeviceSettings::new(DeviceId::new("0x01"));
        assert_eq!(settings.friendly_name, "0x01");
        assert!(!settings.retrieve_state);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn should_return_validation_error_when_name_is_blank() {
        let mut settings = DeviceSettings::new(DeviceId::new("0x01"));
        settings.friendly_name = "  ".to_string();
        assert!(matches!(
            settings.validate(),
            Err(BridgeError::Validation(ValidationError::EmptyName))
        ));
    }

    #[test]
    fn should_parse_remove_modes() {
        assert_eq!("remove".parse::<RemoveMode>(), Ok(RemoveMode::Remove));
        assert_eq!(
            "force_remove".parse::<RemoveMode>(),
            Ok(RemoveMode::ForceRemove)
        );
        assert_eq!("ban".parse::<RemoveMode>(), Ok(RemoveMode::Ban));
        assert_eq!(
            "nuke".parse::<RemoveMode>(),
            Err(ValidationError::InvalidRemoveMode("nuke".to_string()))
        );
    }

    #[test]
    fn should_only_skip_network_for_force_remove() {
        assert!(RemoveMode::Remove.contacts_device());
        assert!(RemoveMode::Ban.contacts_device());
        assert!(!RemoveMode::ForceRemove.contacts_device());
    }

    #[test]
    fn should_report_primary_endpoint_first() {
        let info = DeviceInfo::new("0x02").with_endpoints(vec![11, 12]);
        assert_eq!(info.primary_endpoint(), Some(11));
    }

    #[test]
    fn should_serialize_power_source_with_display_label() {
        let json = serde_json::to_value(PowerSource::Mains).unwrap();
        assert_eq!(json, serde_json::json!("Mains (single phase)"));
    }
}
