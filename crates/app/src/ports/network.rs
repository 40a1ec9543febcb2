//! Control network port: the radio stack seen through entity lifecycle calls.
//!
//! Pairing, interviewing and radio I/O live behind this trait. The core only
//! lists devices, asks them to leave, manages group membership and reacts to
//! what the network reports through [`NetworkEvent`]s.

use async_trait::async_trait;
use tokio::sync::broadcast;

use meshbridge_domain::device::DeviceInfo;
use meshbridge_domain::error::BridgeError;
use meshbridge_domain::id::{DeviceId, GroupId};
use meshbridge_domain::state::StateMap;

/// Something the network observed without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A device joined (or rejoined) the network.
    DeviceJoined(DeviceInfo),
    /// A device left on its own.
    DeviceLeft(DeviceId),
    /// A device reported attribute values, already decoded.
    Report { device: DeviceId, payload: StateMap },
}

/// Lifecycle operations on the control network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Unique name identifying this network backend (e.g. `"virtual"`).
    fn name(&self) -> &'static str;

    /// Bring the network up. Devices already known are listed afterwards.
    async fn start(&self) -> Result<(), BridgeError>;

    /// Called on graceful shutdown.
    async fn stop(&self) -> Result<(), BridgeError>;

    /// Events emitted after the subscription is created.
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent>;

    /// Every known device, coordinator included.
    fn devices(&self) -> Vec<DeviceInfo>;

    fn device(&self, id: &DeviceId) -> Option<DeviceInfo>;

    /// Ask the device to leave the network and wait for acknowledgement.
    async fn request_leave(&self, id: &DeviceId) -> Result<(), BridgeError>;

    /// Drop the device from the local database without contacting it.
    async fn forget_device(&self, id: &DeviceId) -> Result<(), BridgeError>;

    async fn create_group(&self, id: GroupId) -> Result<(), BridgeError>;

    async fn remove_group(&self, id: GroupId) -> Result<(), BridgeError>;

    async fn add_to_group(
        &self,
        group: GroupId,
        device: &DeviceId,
        endpoint: u8,
    ) -> Result<(), BridgeError>;

    async fn remove_from_group(
        &self,
        group: GroupId,
        device: &DeviceId,
        endpoint: u8,
    ) -> Result<(), BridgeError>;

    async fn permit_join(&self, enabled: bool) -> Result<(), BridgeError>;

    fn permit_join_enabled(&self) -> bool;

    /// Soft-reset the coordinator.
    async fn reset(&self) -> Result<(), BridgeError>;

    /// Factory-reset the nearest touchlink-capable device. `Ok(false)` when
    /// none answered.
    async fn touchlink_factory_reset(&self) -> Result<bool, BridgeError>;
}
