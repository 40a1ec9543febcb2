//! In-memory fakes for every port, shared by the unit tests of this crate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use meshbridge_domain::device::{DeviceInfo, DeviceSettings};
use meshbridge_domain::error::{BridgeError, ConverterError, LifecycleError};
use meshbridge_domain::group::{GroupSettings, MemberKey};
use meshbridge_domain::id::{DeviceId, EntityRef, GroupId};
use meshbridge_domain::state::StateMap;

use crate::bridge::Bridge;
use crate::event_bus::EventBus;
use crate::pipeline::ConverterPipeline;
use crate::ports::{
    CapabilityDescriptor, ConvertContext, Converter, Definition, DefinitionRegistry,
    FixedLogLevel, Network, NetworkEvent, Operation, SetOutcome, SettingsStore, StateStore,
    Target,
};
use crate::publisher::EntityStatePublisher;
use crate::resolver::{Resolved, Resolver};

#[derive(Default)]
pub struct MemorySettings {
    devices: Mutex<BTreeMap<DeviceId, DeviceSettings>>,
    groups: Mutex<BTreeMap<GroupId, GroupSettings>>,
    banned: Mutex<BTreeSet<DeviceId>>,
}

impl SettingsStore for MemorySettings {
    fn device(&self, id: &DeviceId) -> Option<DeviceSettings> {
        self.devices.lock().unwrap().get(id).cloned()
    }

    fn devices(&self) -> Vec<DeviceSettings> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    fn put_device(&self, settings: DeviceSettings) -> Result<(), BridgeError> {
        self.devices
            .lock()
            .unwrap()
            .insert(settings.id.clone(), settings);
        Ok(())
    }

    fn remove_device(&self, id: &DeviceId) -> Result<(), BridgeError> {
        self.devices.lock().unwrap().remove(id);
        Ok(())
    }

    fn group(&self, id: GroupId) -> Option<GroupSettings> {
        self.groups.lock().unwrap().get(&id).cloned()
    }

    fn groups(&self) -> Vec<GroupSettings> {
        self.groups.lock().unwrap().values().cloned().collect()
    }

    fn put_group(&self, settings: GroupSettings) -> Result<(), BridgeError> {
        self.groups.lock().unwrap().insert(settings.id, settings);
        Ok(())
    }

    fn remove_group(&self, id: GroupId) -> Result<(), BridgeError> {
        self.groups.lock().unwrap().remove(&id);
        Ok(())
    }

    fn ban(&self, id: &DeviceId) -> Result<(), BridgeError> {
        self.banned.lock().unwrap().insert(id.clone());
        Ok(())
    }

    fn is_banned(&self, id: &DeviceId) -> bool {
        self.banned.lock().unwrap().contains(id)
    }
}

#[derive(Default)]
pub struct MemoryState(Mutex<HashMap<EntityRef, StateMap>>);

impl StateStore for MemoryState {
    fn get(&self, entity: &EntityRef) -> Option<StateMap> {
        self.0.lock().unwrap().get(entity).cloned()
    }

    fn set(&self, entity: &EntityRef, state: StateMap) {
        self.0.lock().unwrap().insert(entity.clone(), state);
    }

    fn remove(&self, entity: &EntityRef) {
        self.0.lock().unwrap().remove(entity);
    }
}

/// Group operations the fake network was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOp {
    Create(GroupId),
    Delete(GroupId),
    Add(GroupId, MemberKey),
    Remove(GroupId, MemberKey),
}

pub struct FakeNetwork {
    devices: Mutex<BTreeMap<DeviceId, DeviceInfo>>,
    fail_leave: AtomicBool,
    permit_join: AtomicBool,
    touchlink_found: AtomicBool,
    group_ops: Mutex<Vec<GroupOp>>,
    resets: Mutex<usize>,
    events: broadcast::Sender<NetworkEvent>,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self {
            devices: Mutex::default(),
            fail_leave: AtomicBool::new(false),
            permit_join: AtomicBool::new(false),
            touchlink_found: AtomicBool::new(false),
            group_ops: Mutex::default(),
            resets: Mutex::new(0),
            events: broadcast::channel(16).0,
        }
    }
}

impl FakeNetwork {
    pub fn add(&self, info: DeviceInfo) {
        self.devices.lock().unwrap().insert(info.id.clone(), info);
    }

    pub fn drop_device(&self, id: &DeviceId) {
        self.devices.lock().unwrap().remove(id);
    }

    /// Make every `request_leave` fail.
    pub fn fail_leave(&self, fail: bool) {
        self.fail_leave.store(fail, Ordering::SeqCst);
    }

    pub fn touchlink_answers(&self, found: bool) {
        self.touchlink_found.store(found, Ordering::SeqCst);
    }

    pub fn group_ops(&self) -> Vec<GroupOp> {
        self.group_ops.lock().unwrap().clone()
    }

    pub fn clear_group_ops(&self) {
        self.group_ops.lock().unwrap().clear();
    }

    pub fn resets(&self) -> usize {
        *self.resets.lock().unwrap()
    }

    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, op: GroupOp) {
        self.group_ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Network for FakeNetwork {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    fn device(&self, id: &DeviceId) -> Option<DeviceInfo> {
        self.devices.lock().unwrap().get(id).cloned()
    }

    async fn request_leave(&self, id: &DeviceId) -> Result<(), BridgeError> {
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(LifecycleError::Network("no answer from device".to_string()).into());
        }
        self.drop_device(id);
        Ok(())
    }

    async fn forget_device(&self, id: &DeviceId) -> Result<(), BridgeError> {
        self.drop_device(id);
        Ok(())
    }

    async fn create_group(&self, id: GroupId) -> Result<(), BridgeError> {
        self.record(GroupOp::Create(id));
        Ok(())
    }

    async fn remove_group(&self, id: GroupId) -> Result<(), BridgeError> {
        self.record(GroupOp::Delete(id));
        Ok(())
    }

    async fn add_to_group(
        &self,
        group: GroupId,
        device: &DeviceId,
        endpoint: u8,
    ) -> Result<(), BridgeError> {
        self.record(GroupOp::Add(group, MemberKey::new(device.clone(), endpoint)));
        Ok(())
    }

    async fn remove_from_group(
        &self,
        group: GroupId,
        device: &DeviceId,
        endpoint: u8,
    ) -> Result<(), BridgeError> {
        self.record(GroupOp::Remove(group, MemberKey::new(device.clone(), endpoint)));
        Ok(())
    }

    async fn permit_join(&self, enabled: bool) -> Result<(), BridgeError> {
        self.permit_join.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn permit_join_enabled(&self) -> bool {
        self.permit_join.load(Ordering::SeqCst)
    }

    async fn reset(&self) -> Result<(), BridgeError> {
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }

    async fn touchlink_factory_reset(&self) -> Result<bool, BridgeError> {
        Ok(self.touchlink_found.load(Ordering::SeqCst))
    }
}

/// One converter invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub converter: &'static str,
    pub operation: Operation,
    pub key: String,
    pub value: Option<Value>,
    pub target: Target,
    pub endpoint_name: Option<String>,
    /// Models of the definitions handed to the converter.
    pub models: Vec<String>,
}

impl Call {
    pub fn get(converter: &'static str, key: &str, target: Target) -> Self {
        Self {
            converter,
            operation: Operation::Get,
            key: key.to_string(),
            value: None,
            target,
            endpoint_name: None,
            models: Vec::new(),
        }
    }
}

type CallLog = Arc<Mutex<Vec<Call>>>;

/// Converter that records every call and echoes `{key: value}` as new state.
struct Recording {
    name: &'static str,
    readable: bool,
    failing: bool,
    read_after: Option<Duration>,
    log: CallLog,
}

#[async_trait]
impl Converter for Recording {
    fn supports(&self, operation: Operation) -> bool {
        operation == Operation::Set || self.readable
    }

    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        self.log.lock().unwrap().push(Call {
            converter: self.name,
            operation: Operation::Set,
            key: key.to_string(),
            value: Some(value.clone()),
            target: target.clone(),
            endpoint_name: ctx.endpoint_name.clone(),
            models: ctx.definitions.iter().map(|d| d.model.clone()).collect(),
        });
        if self.failing {
            return Err(ConverterError::Failed("device did not answer".to_string()));
        }
        let mut state = Map::new();
        state.insert(key.to_string(), value.clone());
        let outcome = SetOutcome::with_state(state);
        Ok(Some(match self.read_after {
            Some(delay) => outcome.read_after(delay),
            None => outcome,
        }))
    }

    async fn convert_get(
        &self,
        target: &Target,
        key: &str,
        ctx: &ConvertContext,
    ) -> Result<(), ConverterError> {
        self.log.lock().unwrap().push(Call {
            converter: self.name,
            operation: Operation::Get,
            key: key.to_string(),
            value: None,
            target: target.clone(),
            endpoint_name: ctx.endpoint_name.clone(),
            models: ctx.definitions.iter().map(|d| d.model.clone()).collect(),
        });
        if self.failing {
            return Err(ConverterError::Failed("device did not answer".to_string()));
        }
        Ok(())
    }
}

/// Registry knowing the models `BULB`, `SWITCH2`, `FLAKY` and `BUTTON`.
pub struct FakeRegistry {
    definitions: HashMap<String, Arc<Definition>>,
    group: Vec<CapabilityDescriptor>,
}

impl FakeRegistry {
    fn new(log: &CallLog) -> Self {
        let converter = |name, readable, read_after: Option<u64>| -> Arc<dyn Converter> {
            Arc::new(Recording {
                name,
                readable,
                failing: false,
                read_after: read_after.map(Duration::from_secs),
                log: Arc::clone(log),
            })
        };
        let definition = |model: &str, description: &str, capabilities: Vec<CapabilityDescriptor>| Definition {
            model: model.to_string(),
            vendor: "Acme".to_string(),
            description: description.to_string(),
            endpoints: BTreeMap::new(),
            capabilities,
        };

        let bulb = definition(
            "BULB",
            "Smart bulb",
            vec![
                CapabilityDescriptor::new(
                    ["state", "brightness", "brightness_percent"],
                    converter("onoff", true, Some(2)),
                ),
                CapabilityDescriptor::new(["color_temp"], converter("color_temp", true, None)),
                CapabilityDescriptor::new(["color"], converter("color", false, None)),
            ],
        );
        let mut switch = definition(
            "SWITCH2",
            "Dual switch",
            vec![CapabilityDescriptor::new(["state"], converter("switch", true, None))],
        );
        switch.endpoints = BTreeMap::from([("left".to_string(), 1), ("right".to_string(), 2)]);
        let flaky = definition(
            "FLAKY",
            "Flaky bulb",
            vec![
                CapabilityDescriptor::new(
                    ["state"],
                    Arc::new(Recording {
                        name: "flaky",
                        readable: true,
                        failing: true,
                        read_after: None,
                        log: Arc::clone(log),
                    }),
                ),
                CapabilityDescriptor::new(["color_temp"], converter("color_temp", true, None)),
            ],
        );
        let button = definition("BUTTON", "Wireless button", Vec::new());

        Self {
            definitions: [bulb, switch, flaky, button]
                .into_iter()
                .map(|def| (def.model.clone(), Arc::new(def)))
                .collect(),
            group: vec![
                CapabilityDescriptor::new(
                    ["state", "brightness", "brightness_percent"],
                    converter("group_onoff", false, None),
                ),
                CapabilityDescriptor::new(["color_temp"], converter("group_color_temp", false, None)),
            ],
        }
    }
}

impl DefinitionRegistry for FakeRegistry {
    fn find_by_device(&self, device: &DeviceInfo) -> Option<Arc<Definition>> {
        device
            .model_id
            .as_deref()
            .and_then(|model| self.definitions.get(model))
            .cloned()
    }

    fn group_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.group.clone()
    }
}

/// Everything wired on fakes.
pub struct Harness {
    pub settings: Arc<MemorySettings>,
    pub state: Arc<MemoryState>,
    pub network: Arc<FakeNetwork>,
    pub registry: Arc<FakeRegistry>,
    pub log_level: Arc<FixedLogLevel>,
    pub resolver: Resolver,
    pub pipeline: ConverterPipeline,
    calls: CallLog,
}

impl Harness {
    pub fn new() -> Self {
        let calls = CallLog::default();
        let settings = Arc::new(MemorySettings::default());
        let state = Arc::new(MemoryState::default());
        let network = Arc::new(FakeNetwork::default());
        let registry = Arc::new(FakeRegistry::new(&calls));
        let resolver = Resolver::new(settings.clone(), network.clone(), registry.clone());
        let publisher = EntityStatePublisher::new(Arc::new(EventBus::new()), state.clone());
        let pipeline = ConverterPipeline::new(resolver.clone(), state.clone(), publisher);
        Self {
            settings,
            state,
            network,
            registry,
            log_level: Arc::new(FixedLogLevel::new("info")),
            resolver,
            pipeline,
            calls,
        }
    }

    /// A bridge running on the harness stores and network.
    pub fn bridge(&self) -> Bridge {
        Bridge::new(
            self.settings.clone(),
            self.state.clone(),
            self.network.clone(),
            self.registry.clone(),
            self.log_level.clone(),
        )
    }

    /// Register a network device with the given model and friendly name.
    pub fn add_device(&self, id: &str, model: &str, name: &str) {
        let mut info = DeviceInfo::new(id).with_model(model);
        if model == "SWITCH2" {
            info = info.with_endpoints(vec![1, 2]);
        }
        self.network.add(info);
        let mut settings = DeviceSettings::new(DeviceId::new(id));
        settings.friendly_name = name.to_string();
        self.settings.put_device(settings).unwrap();
    }

    pub fn add_group(&self, id: u16, name: &str) {
        self.settings
            .put_group(GroupSettings::new(GroupId::new(id), name))
            .unwrap();
    }

    pub fn enable_retrieve_state(&self, id: &str) {
        let mut settings = self.settings.device(&DeviceId::new(id)).unwrap();
        settings.retrieve_state = true;
        self.settings.put_device(settings).unwrap();
    }

    pub fn set_state(&self, id: &str, state: Value) {
        self.state.set(
            &EntityRef::Device(DeviceId::new(id)),
            state.as_object().cloned().unwrap(),
        );
    }

    pub fn state_of(&self, id: &str) -> StateMap {
        self.state.get_or_default(&EntityRef::Device(DeviceId::new(id)))
    }

    pub fn device_name(&self, id: &str) -> String {
        self.settings
            .device(&DeviceId::new(id))
            .map(|s| s.friendly_name)
            .unwrap_or_default()
    }

    /// Run a set through the harness pipeline.
    pub async fn apply_set(&self, id: &str, payload: Value) -> bool {
        let device = self.resolver.device(id).unwrap();
        self.pipeline
            .apply(
                Operation::Set,
                &Resolved::Device(device),
                &payload.as_object().cloned().unwrap(),
            )
            .await
    }

    /// Converter calls so far, in invocation order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}
