//! Simulated control network.
//!
//! Devices live in a table keyed by address; attribute values are kept per
//! `(device, endpoint)` so converters can write and read them back the way a
//! radio stack would. Reports travel on the same broadcast channel a real
//! stack would use.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use meshbridge_app::ports::{Network, NetworkEvent};
use meshbridge_domain::device::{DeviceInfo, DeviceKind};
use meshbridge_domain::error::{BridgeError, LifecycleError};
use meshbridge_domain::id::{DeviceId, GroupId};
use meshbridge_domain::state::StateMap;
use meshbridge_domain::time::now;

const EVENT_CAPACITY: usize = 256;

/// Address of the simulated coordinator.
pub const COORDINATOR_ADDRESS: &str = "0x0000000000000000";

type Endpoint = (DeviceId, u8);

pub struct VirtualNetwork {
    nodes: RwLock<BTreeMap<DeviceId, DeviceInfo>>,
    attributes: RwLock<HashMap<Endpoint, StateMap>>,
    groups: RwLock<BTreeMap<GroupId, BTreeSet<Endpoint>>>,
    permit_join: AtomicBool,
    events: broadcast::Sender<NetworkEvent>,
}

impl Default for VirtualNetwork {
    fn default() -> Self {
        let coordinator = DeviceInfo::new(COORDINATOR_ADDRESS).with_kind(DeviceKind::Coordinator);
        Self {
            nodes: RwLock::new(BTreeMap::from([(coordinator.id.clone(), coordinator)])),
            attributes: RwLock::default(),
            groups: RwLock::default(),
            permit_join: AtomicBool::new(false),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }
}

impl VirtualNetwork {
    /// A network holding only its coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device as already paired. No event is emitted.
    pub fn insert(&self, info: DeviceInfo) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.insert(info.id.clone(), info);
    }

    /// Pair a new device and announce it.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Network`] while joining is not permitted.
    pub fn join(&self, mut info: DeviceInfo) -> Result<(), BridgeError> {
        if !self.permit_join.load(Ordering::SeqCst) {
            return Err(LifecycleError::Network("joining is not permitted".to_string()).into());
        }
        info.last_seen = Some(now());
        self.insert(info.clone());
        tracing::info!(device = %info.id, "device joined");
        self.announce(NetworkEvent::DeviceJoined(info));
        Ok(())
    }

    /// The device leaves on its own, e.g. after a local factory reset.
    pub fn leave(&self, id: &DeviceId) {
        if self.drop_node(id) {
            self.announce(NetworkEvent::DeviceLeft(id.clone()));
        }
    }

    /// Store `value` for `key` on one endpoint.
    pub fn write(&self, device: &DeviceId, endpoint: u8, key: &str, value: Value) {
        let mut attributes = self.attributes.write().unwrap_or_else(PoisonError::into_inner);
        attributes
            .entry((device.clone(), endpoint))
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Last value written for `key` on one endpoint.
    #[must_use]
    pub fn read(&self, device: &DeviceId, endpoint: u8, key: &str) -> Option<Value> {
        let attributes = self.attributes.read().unwrap_or_else(PoisonError::into_inner);
        attributes
            .get(&(device.clone(), endpoint))
            .and_then(|values| values.get(key))
            .cloned()
    }

    /// Endpoints currently bound to `group`.
    #[must_use]
    pub fn group_members(&self, group: GroupId) -> Vec<(DeviceId, u8)> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .get(&group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Emit a decoded attribute report from `device`.
    pub fn report(&self, device: &DeviceId, payload: StateMap) {
        self.touch(device);
        self.announce(NetworkEvent::Report {
            device: device.clone(),
            payload,
        });
    }

    fn touch(&self, device: &DeviceId) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = nodes.get_mut(device) {
            node.last_seen = Some(now());
        }
    }

    fn announce(&self, event: NetworkEvent) {
        // No receiver yet is not an error for a radio.
        let _ = self.events.send(event);
    }

    fn drop_node(&self, id: &DeviceId) -> bool {
        let removed = {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            nodes.remove(id).is_some()
        };
        let mut attributes = self.attributes.write().unwrap_or_else(PoisonError::into_inner);
        attributes.retain(|(device, _), _| device != id);
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        for members in groups.values_mut() {
            members.retain(|(device, _)| device != id);
        }
        removed
    }

    fn require(&self, id: &DeviceId) -> Result<DeviceInfo, BridgeError> {
        self.device(id).ok_or_else(|| {
            LifecycleError::Network(format!("device '{id}' is not on the network")).into()
        })
    }
}

#[async_trait]
impl Network for VirtualNetwork {
    fn name(&self) -> &'static str {
        "virtual"
    }

    async fn start(&self) -> Result<(), BridgeError> {
        let count = self.devices().len();
        tracing::info!(devices = count, "virtual network started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        tracing::info!("virtual network stopped");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.values().cloned().collect()
    }

    fn device(&self, id: &DeviceId) -> Option<DeviceInfo> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).cloned()
    }

    async fn request_leave(&self, id: &DeviceId) -> Result<(), BridgeError> {
        let info = self.require(id)?;
        if info.is_coordinator() {
            return Err(LifecycleError::Network("the coordinator cannot leave".to_string()).into());
        }
        self.drop_node(id);
        tracing::debug!(device = %id, "device acknowledged leave");
        Ok(())
    }

    async fn forget_device(&self, id: &DeviceId) -> Result<(), BridgeError> {
        self.drop_node(id);
        Ok(())
    }

    async fn create_group(&self, id: GroupId) -> Result<(), BridgeError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.entry(id).or_default();
        Ok(())
    }

    async fn remove_group(&self, id: GroupId) -> Result<(), BridgeError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.remove(&id);
        Ok(())
    }

    async fn add_to_group(
        &self,
        group: GroupId,
        device: &DeviceId,
        endpoint: u8,
    ) -> Result<(), BridgeError> {
        let info = self.require(device)?;
        if !info.endpoints.contains(&endpoint) {
            return Err(LifecycleError::Network(format!(
                "device '{device}' has no endpoint {endpoint}"
            ))
            .into());
        }
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups
            .entry(group)
            .or_default()
            .insert((device.clone(), endpoint));
        Ok(())
    }

    async fn remove_from_group(
        &self,
        group: GroupId,
        device: &DeviceId,
        endpoint: u8,
    ) -> Result<(), BridgeError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = groups.get_mut(&group) {
            members.remove(&(device.clone(), endpoint));
        }
        Ok(())
    }

    async fn permit_join(&self, enabled: bool) -> Result<(), BridgeError> {
        self.permit_join.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "permit join changed");
        Ok(())
    }

    fn permit_join_enabled(&self) -> bool {
        self.permit_join.load(Ordering::SeqCst)
    }

    async fn reset(&self) -> Result<(), BridgeError> {
        tracing::info!("virtual coordinator soft reset");
        Ok(())
    }

    /// Resets the first router in range, wiping its attributes.
    async fn touchlink_factory_reset(&self) -> Result<bool, BridgeError> {
        let target = self
            .devices()
            .into_iter()
            .find(|d| d.kind == DeviceKind::Router)
            .map(|d| d.id);
        let Some(target) = target else {
            return Ok(false);
        };
        let mut attributes = self.attributes.write().unwrap_or_else(PoisonError::into_inner);
        attributes.retain(|(device, _), _| *device != target);
        tracing::info!(device = %target, "touchlink factory reset");
        Ok(true)
    }
}
