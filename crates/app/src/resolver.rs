//! Entity resolution: from a user-supplied key to a fully described entity.
//!
//! A key is either the stable identifier (network address, numeric group id)
//! or the entity's current friendly name.

use std::sync::Arc;

use serde_json::{Map, Value};

use meshbridge_domain::device::{DeviceInfo, DeviceSettings};
use meshbridge_domain::error::{BridgeError, NotFoundError};
use meshbridge_domain::group::GroupSettings;
use meshbridge_domain::id::{DeviceId, EntityRef, GroupId};

use crate::ports::{Definition, DefinitionRegistry, Network, SettingsStore};

/// A device together with its settings record and model definition.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub info: DeviceInfo,
    pub settings: DeviceSettings,
    /// `None` for devices the registry does not support.
    pub definition: Option<Arc<Definition>>,
}

impl ResolvedDevice {
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.info.id
    }

    #[must_use]
    pub fn entity(&self) -> EntityRef {
        EntityRef::Device(self.info.id.clone())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.friendly_name
    }

    /// `<vendor> <description>`, or `[Unsupported] <manufacturer> <model id>`.
    #[must_use]
    pub fn model_label(&self) -> String {
        let parts: Vec<&str> = match &self.definition {
            Some(def) => vec![def.vendor.as_str(), def.description.as_str()],
            None => vec![
                "[Unsupported]",
                self.info.manufacturer_name.as_deref().unwrap_or_default(),
                self.info.model_id.as_deref().unwrap_or_default(),
            ],
        };
        parts
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A group and its settings record.
#[derive(Debug, Clone)]
pub struct ResolvedGroup {
    pub settings: GroupSettings,
}

impl ResolvedGroup {
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.settings.id
    }

    #[must_use]
    pub fn entity(&self) -> EntityRef {
        EntityRef::Group(self.settings.id)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.friendly_name
    }
}

/// Either kind of resolved entity.
#[derive(Debug, Clone)]
pub enum Resolved {
    Device(ResolvedDevice),
    Group(ResolvedGroup),
}

impl Resolved {
    #[must_use]
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Device(d) => d.entity(),
            Self::Group(g) => g.entity(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Device(d) => d.name(),
            Self::Group(g) => g.name(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &Map<String, Value> {
        match self {
            Self::Device(d) => &d.settings.options,
            Self::Group(g) => &g.settings.options,
        }
    }
}

/// Looks entities up across the network and the settings store.
#[derive(Clone)]
pub struct Resolver {
    settings: Arc<dyn SettingsStore>,
    network: Arc<dyn Network>,
    registry: Arc<dyn DefinitionRegistry>,
}

impl Resolver {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        network: Arc<dyn Network>,
        registry: Arc<dyn DefinitionRegistry>,
    ) -> Self {
        Self {
            settings,
            network,
            registry,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    #[must_use]
    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn DefinitionRegistry> {
        &self.registry
    }

    /// Describe a network device. A device without a settings record gets
    /// the default one, which is not persisted.
    #[must_use]
    pub fn describe(&self, info: DeviceInfo) -> ResolvedDevice {
        let settings = self
            .settings
            .device(&info.id)
            .unwrap_or_else(|| DeviceSettings::new(info.id.clone()));
        let definition = self.registry.find_by_device(&info);
        ResolvedDevice {
            info,
            settings,
            definition,
        }
    }

    /// Describe a device the bridge takes over, persisting its default
    /// settings record when it has none yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings record cannot be persisted.
    pub fn adopt(&self, info: DeviceInfo) -> Result<ResolvedDevice, BridgeError> {
        if self.settings.device(&info.id).is_none() {
            self.settings.put_device(DeviceSettings::new(info.id.clone()))?;
        }
        Ok(self.describe(info))
    }

    /// Resolve a device by address or friendly name.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Device`] when neither matches a known device.
    pub fn device(&self, key: &str) -> Result<ResolvedDevice, BridgeError> {
        let info = self
            .network
            .device(&DeviceId::new(key))
            .or_else(|| {
                self.settings
                    .device_by_name(key)
                    .and_then(|s| self.network.device(&s.id))
            })
            .ok_or_else(|| NotFoundError::Device(key.to_string()))?;
        Ok(self.describe(info))
    }

    /// Resolve a group by numeric id or friendly name.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Group`] when neither matches a known group.
    pub fn group(&self, key: &str) -> Result<ResolvedGroup, BridgeError> {
        key.parse::<GroupId>()
            .ok()
            .and_then(|id| self.settings.group(id))
            .or_else(|| self.settings.group_by_name(key))
            .map(|settings| ResolvedGroup { settings })
            .ok_or_else(|| NotFoundError::Group(key.to_string()).into())
    }

    /// Resolve a key that may name either kind, devices first.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Device`] when nothing matches.
    pub fn entity(&self, key: &str) -> Result<Resolved, BridgeError> {
        match self.device(key) {
            Ok(device) => Ok(Resolved::Device(device)),
            Err(BridgeError::NotFound(_)) => self
                .group(key)
                .map(Resolved::Group)
                .map_err(|_| NotFoundError::Device(key.to_string()).into()),
            Err(err) => Err(err),
        }
    }

    /// Every non-coordinator device, resolved. Read only.
    #[must_use]
    pub fn devices(&self) -> Vec<ResolvedDevice> {
        self.network
            .devices()
            .into_iter()
            .filter(|info| !info.is_coordinator())
            .map(|info| self.describe(info))
            .collect()
    }

    #[must_use]
    pub fn groups(&self) -> Vec<ResolvedGroup> {
        self.settings
            .groups()
            .into_iter()
            .map(|settings| ResolvedGroup { settings })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use meshbridge_domain::device::DeviceKind;

    #[test]
    fn should_resolve_device_by_address_without_persisting_settings() {
        let harness = Harness::new();
        harness.network.add(DeviceInfo::new("0xb1").with_model("BULB"));

        let device = harness.resolver.device("0xb1").unwrap();
        let listed = harness.resolver.devices();

        assert_eq!(device.name(), "0xb1");
        assert!(device.definition.is_some());
        assert_eq!(listed.len(), 1);
        assert!(harness.settings.device(&DeviceId::new("0xb1")).is_none());
    }

    #[test]
    fn should_persist_default_settings_on_adopt() {
        let harness = Harness::new();
        harness.add_device("0xb2", "BULB", "kept");
        let id = DeviceId::new("0xb1");

        harness.resolver.adopt(DeviceInfo::new("0xb1").with_model("BULB")).unwrap();
        let kept = harness.resolver.adopt(DeviceInfo::new("0xb2").with_model("BULB")).unwrap();

        assert_eq!(harness.settings.device(&id).unwrap().friendly_name, "0xb1");
        assert_eq!(kept.name(), "kept");
    }

    #[test]
    fn should_resolve_device_by_friendly_name() {
        let harness = Harness::new();
        harness.add_device("0xb1", "BULB", "kitchen");

        let device = harness.resolver.device("kitchen").unwrap();

        assert_eq!(device.id().as_str(), "0xb1");
    }

    #[test]
    fn should_return_not_found_for_unknown_device() {
        let harness = Harness::new();
        let err = harness.resolver.device("ghost").unwrap_err();
        assert_eq!(err.to_string(), "device 'ghost' does not exist");
    }

    #[test]
    fn should_resolve_group_by_id_or_name() {
        let harness = Harness::new();
        harness.add_group(3, "lounge");

        assert_eq!(harness.resolver.group("3").unwrap().name(), "lounge");
        assert_eq!(harness.resolver.group("lounge").unwrap().id().value(), 3);
        assert!(harness.resolver.group("4").is_err());
    }

    #[test]
    fn should_fall_back_to_group_when_no_device_matches() {
        let harness = Harness::new();
        harness.add_group(7, "hall");

        let resolved = harness.resolver.entity("hall").unwrap();

        assert!(matches!(resolved, Resolved::Group(_)));
    }

    #[test]
    fn should_skip_coordinator_in_listing() {
        let harness = Harness::new();
        harness
            .network
            .add(DeviceInfo::new("0x00").with_kind(DeviceKind::Coordinator));
        harness.add_device("0xb1", "BULB", "kitchen");

        let devices = harness.resolver.devices();

        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn should_label_unsupported_model() {
        let harness = Harness::new();
        harness.network.add(
            DeviceInfo::new("0xdd")
                .with_manufacturer("ACME")
                .with_model("WIDGET"),
        );

        let device = harness.resolver.device("0xdd").unwrap();

        assert!(device.definition.is_none());
        assert_eq!(device.model_label(), "[Unsupported] ACME WIDGET");
    }
}
