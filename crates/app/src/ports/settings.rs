//! Settings store port: persisted configuration records for devices and groups.

use meshbridge_domain::device::DeviceSettings;
use meshbridge_domain::error::BridgeError;
use meshbridge_domain::group::GroupSettings;
use meshbridge_domain::id::{DeviceId, GroupId};

/// Key-value access to persisted entity records.
///
/// Calls are synchronous: implementations hold their data in memory (or
/// cache it) so that event-bus handlers, which run synchronously on the
/// emitter's stack, can consult settings without awaiting.
pub trait SettingsStore: Send + Sync {
    fn device(&self, id: &DeviceId) -> Option<DeviceSettings>;

    fn devices(&self) -> Vec<DeviceSettings>;

    /// Insert or replace a device record.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be persisted.
    fn put_device(&self, settings: DeviceSettings) -> Result<(), BridgeError>;

    /// Remove a device record. Removing a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the removal cannot be persisted.
    fn remove_device(&self, id: &DeviceId) -> Result<(), BridgeError>;

    fn group(&self, id: GroupId) -> Option<GroupSettings>;

    fn groups(&self) -> Vec<GroupSettings>;

    /// Insert or replace a group record.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be persisted.
    fn put_group(&self, settings: GroupSettings) -> Result<(), BridgeError>;

    /// Remove a group record. Removing a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the removal cannot be persisted.
    fn remove_group(&self, id: GroupId) -> Result<(), BridgeError>;

    /// Persist a rejection so the device cannot rejoin.
    ///
    /// # Errors
    ///
    /// Returns an error when the ban list cannot be persisted.
    fn ban(&self, id: &DeviceId) -> Result<(), BridgeError>;

    fn is_banned(&self, id: &DeviceId) -> bool;

    /// Look a device up by its current friendly name.
    fn device_by_name(&self, name: &str) -> Option<DeviceSettings> {
        self.devices().into_iter().find(|d| d.friendly_name == name)
    }

    /// Look a group up by its current friendly name.
    fn group_by_name(&self, name: &str) -> Option<GroupSettings> {
        self.groups().into_iter().find(|g| g.friendly_name == name)
    }

    /// Whether any device or group already uses `name`.
    fn name_in_use(&self, name: &str) -> bool {
        self.device_by_name(name).is_some() || self.group_by_name(name).is_some()
    }
}
