//! Group: a set of device endpoints commanded together, plus its scenes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, ValidationError};
use crate::id::{DeviceId, GroupId};
use crate::state::StateMap;

/// One membership entry: a device endpoint, rendered `<address>/<endpoint>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberKey {
    pub device: DeviceId,
    pub endpoint: u8,
}

impl MemberKey {
    #[must_use]
    pub fn new(device: DeviceId, endpoint: u8) -> Self {
        Self { device, endpoint }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.endpoint)
    }
}

impl FromStr for MemberKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidField {
            field: "devices",
            reason: format!("'{s}' is not of the form <address>/<endpoint>"),
        };
        let (device, endpoint) = s.rsplit_once('/').ok_or_else(invalid)?;
        if device.is_empty() {
            return Err(invalid());
        }
        let endpoint = endpoint.parse().map_err(|_| invalid())?;
        Ok(Self::new(DeviceId::new(device), endpoint))
    }
}

impl TryFrom<String> for MemberKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MemberKey> for String {
    fn from(value: MemberKey) -> Self {
        value.to_string()
    }
}

/// A stored per-member state snapshot, replayed on recall.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Member device address → state to apply to it.
    pub state: BTreeMap<DeviceId, StateMap>,
}

/// Persisted record for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub id: GroupId,
    pub friendly_name: String,
    #[serde(default)]
    pub devices: Vec<MemberKey>,
    #[serde(default)]
    pub scenes: BTreeMap<String, Scene>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl GroupSettings {
    #[must_use]
    pub fn new(id: GroupId, friendly_name: impl Into<String>) -> Self {
        Self {
            id,
            friendly_name: friendly_name.into(),
            devices: Vec::new(),
            scenes: BTreeMap::new(),
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

    /// Distinct member device addresses, in membership order.
    #[must_use]
    pub fn member_devices(&self) -> Vec<DeviceId> {
        let mut out: Vec<DeviceId> = Vec::new();
        for member in &self.devices {
            if !out.contains(&member.device) {
                out.push(member.device.clone());
            }
        }
        out
    }

    #[must_use]
    pub fn has_member(&self, device: &DeviceId) -> bool {
        self.devices.iter().any(|m| &m.device == device)
    }

    /// A scene may only reference current members.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SceneMember`] naming the first foreign device.
    pub fn check_scene(&self, name: &str, scene: &Scene) -> Result<(), ValidationError> {
        match scene.state.keys().find(|device| !self.has_member(device)) {
            Some(device) => Err(ValidationError::SceneMember {
                scene: name.to_string(),
                device: device.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with_members() -> GroupSettings {
        let mut group = GroupSettings::new(GroupId::new(1), "living");
        group.devices = vec![
            "0x01/1".parse().unwrap(),
            "0x02/1".parse().unwrap(),
            "0x02/2".parse().unwrap(),
        ];
        group
    }

    #[test]
    fn should_parse_member_key_on_last_slash() {
        let key: MemberKey = "0xabc/11".parse().unwrap();
        assert_eq!(key.device.as_str(), "0xabc");
        assert_eq!(key.endpoint, 11);
        assert_eq!(key.to_string(), "0xabc/11");
    }

    #[test]
    fn should_reject_member_key_without_endpoint() {
        assert!("0xabc".parse::<MemberKey>().is_err());
        assert!("0xabc/left".parse::<MemberKey>().is_err());
        assert!("/1".parse::<MemberKey>().is_err());
    }

    #[test]
    fn should_serialize_member_key_as_string() {
        let key = MemberKey::new(DeviceId::new("0x01"), 2);
        assert_eq!(serde_json::to_value(&key).unwrap(), serde_json::json!("0x01/2"));
    }

    #[test]
    fn should_list_distinct_member_devices() {
        let group = group_with_members();
        let members = group.member_devices();
        assert_eq!(members, vec![DeviceId::new("0x01"), DeviceId::new("0x02")]);
    }

    #[test]
    fn should_accept_scene_referencing_members_only() {
        let group = group_with_members();
        let mut scene = Scene::default();
        scene.state.insert(DeviceId::new("0x02"), StateMap::new());
        assert!(group.check_scene("evening", &scene).is_ok());
    }

    #[test]
    fn should_reject_scene_referencing_foreign_device() {
        let group = group_with_members();
        let mut scene = Scene::default();
        scene.state.insert(DeviceId::new("0x99"), StateMap::new());
        assert_eq!(
            group.check_scene("evening", &scene),
            Err(ValidationError::SceneMember {
                scene: "evening".to_string(),
                device: "0x99".to_string()
            })
        );
    }

    #[test]
    fn should_return_validation_error_when_name_is_empty() {
        let group = GroupSettings::new(GroupId::new(4), "");
        assert!(matches!(
            group.validate(),
            Err(BridgeError::Validation(ValidationError::EmptyName))
        ));
    }
}
