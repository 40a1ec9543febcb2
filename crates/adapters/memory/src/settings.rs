//! [`SettingsStore`] backed by ordered maps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use meshbridge_app::ports::SettingsStore;
use meshbridge_domain::device::DeviceSettings;
use meshbridge_domain::error::BridgeError;
use meshbridge_domain::group::GroupSettings;
use meshbridge_domain::id::{DeviceId, GroupId};

/// Settings records held in memory, listed in identifier order.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    devices: RwLock<BTreeMap<DeviceId, DeviceSettings>>,
    groups: RwLock<BTreeMap<GroupId, GroupSettings>>,
    banned: RwLock<BTreeSet<DeviceId>>,
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with validated records.
    ///
    /// # Errors
    ///
    /// Returns the first validation error; later records are not inspected.
    pub fn seeded(
        devices: impl IntoIterator<Item = DeviceSettings>,
        groups: impl IntoIterator<Item = GroupSettings>,
    ) -> Result<Self, BridgeError> {
        let store = Self::new();
        for device in devices {
            device.validate()?;
            store.put_device(device)?;
        }
        for group in groups {
            group.validate()?;
            store.put_group(group)?;
        }
        Ok(store)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn device(&self, id: &DeviceId) -> Option<DeviceSettings> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.get(id).cloned()
    }

    fn devices(&self) -> Vec<DeviceSettings> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.values().cloned().collect()
    }

    fn put_device(&self, settings: DeviceSettings) -> Result<(), BridgeError> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices.insert(settings.id.clone(), settings);
        Ok(())
    }

    fn remove_device(&self, id: &DeviceId) -> Result<(), BridgeError> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices.remove(id);
        Ok(())
    }

    fn group(&self, id: GroupId) -> Option<GroupSettings> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.get(&id).cloned()
    }

    fn groups(&self) -> Vec<GroupSettings> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.values().cloned().collect()
    }

    fn put_group(&self, settings: GroupSettings) -> Result<(), BridgeError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.insert(settings.id, settings);
        Ok(())
    }

    fn remove_group(&self, id: GroupId) -> Result<(), BridgeError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.remove(&id);
        Ok(())
    }

    fn ban(&self, id: &DeviceId) -> Result<(), BridgeError> {
        let mut banned = self.banned.write().unwrap_or_else(PoisonError::into_inner);
        banned.insert(id.clone());
        Ok(())
    }

    fn is_banned(&self, id: &DeviceId) -> bool {
        let banned = self.banned.read().unwrap_or_else(PoisonError::into_inner);
        banned.contains(id)
    }
}
