//! Devices delegate: owns the `devices` namespace.
//!
//! | path          | get         | set                  | delete  |
//! |---------------|-------------|----------------------|---------|
//! | `[]`          | listing     |                      |         |
//! | `[id]`        | device info | properties           | removal |
//! | `[id, state]` | cached state| converter pipeline   |         |

use std::sync::{Arc, Weak};

use serde_json::{Map, Value, json};

use meshbridge_domain::device::{DeviceInfo, RemoveMode};
use meshbridge_domain::envelope::Command;
use meshbridge_domain::error::{BridgeError, LifecycleError, NotFoundError, ValidationError};
use meshbridge_domain::event::{BusEvent, EventKind, PathChange};
use meshbridge_domain::id::{DeviceId, EntityRef};
use meshbridge_domain::path::Path;
use meshbridge_domain::state::{StateMap, has_event};
use meshbridge_domain::time::epoch_millis;
use meshbridge_domain::tree::StateTree;

use crate::event_bus::EventBus;
use crate::pipeline::ConverterPipeline;
use crate::ports::{NetworkEvent, Operation, StateStore};
use crate::publisher::EntityStatePublisher;
use crate::resolver::{Resolved, ResolvedDevice, Resolver};

const NAMESPACE: &str = "devices";

/// Properties settable on `devices/<id>`.
#[derive(Debug, Clone, PartialEq)]
enum DeviceProperty {
    Name(String),
    ForceUpdate(Value),
    Whitelist(bool),
    Options(Map<String, Value>),
}

impl DeviceProperty {
    /// Parse every key of `data`, rejecting the whole set on the first
    /// unknown or malformed one.
    fn parse_all(data: Map<String, Value>) -> Result<Vec<Self>, ValidationError> {
        data.into_iter()
            .map(|(key, value)| match key.as_str() {
                "name" => match value {
                    Value::String(name) => Ok(Self::Name(name)),
                    _ => Err(expected("name", "a string")),
                },
                "force_update" => Ok(Self::ForceUpdate(value)),
                "whitelist" => value
                    .as_bool()
                    .map(Self::Whitelist)
                    .ok_or_else(|| expected("whitelist", "a boolean")),
                "options" => match value {
                    Value::Object(options) => Ok(Self::Options(options)),
                    _ => Err(expected("options", "an object")),
                },
                _ => Err(ValidationError::UnknownProperty(key)),
            })
            .collect()
    }
}

fn expected(field: &'static str, what: &str) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: format!("expected {what}"),
    }
}

/// `devices/<id>`.
fn device_path(id: &DeviceId) -> Path {
    [NAMESPACE, id.as_str()].into_iter().collect()
}

/// Cached state plus `last_seen`, as published on `devices/<id>/state`.
fn device_state(device: &ResolvedDevice, state: &dyn StateStore) -> StateMap {
    let mut out = state.get_or_default(&device.entity());
    if let Some(seen) = device.info.last_seen {
        out.insert("last_seen".to_string(), Value::from(epoch_millis(seen)));
    }
    out
}

/// Snapshot node of one device: an opaque unit with its state nested as a
/// separate opaque unit.
fn device_node(device: &ResolvedDevice, state: &dyn StateStore) -> StateTree {
    let (writable, readable) = match &device.definition {
        Some(def) => (def.writable_keys(), def.readable_keys()),
        None => (Vec::new(), Vec::new()),
    };
    let mut node = StateTree::opaque();
    node.insert("writable", json!(writable));
    node.insert("readable", json!(readable));
    node.insert("state", StateTree::opaque_from(&device_state(device, state)));
    node.insert("name", json!(device.name()));
    node.insert("model", json!(device.model_label()));
    node.insert("power_source", json!(device.info.power_source));
    node.insert(
        "last_seen",
        device
            .info
            .last_seen
            .map_or(Value::Null, |ts| Value::from(epoch_millis(ts))),
    );
    node
}

/// Delegate for the `devices` namespace.
pub struct DevicesApi {
    resolver: Resolver,
    state: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    pipeline: ConverterPipeline,
    publisher: EntityStatePublisher,
}

impl DevicesApi {
    pub fn new(
        resolver: Resolver,
        state: Arc<dyn StateStore>,
        bus: Arc<EventBus>,
        pipeline: ConverterPipeline,
        publisher: EntityStatePublisher,
    ) -> Self {
        Self {
            resolver,
            state,
            bus,
            pipeline,
            publisher,
        }
    }

    /// Register the handlers turning device events into path changes.
    pub fn subscribe(&self) {
        let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
        let resolver = self.resolver.clone();
        let state = Arc::clone(&self.state);
        self.bus.subscribe(EventKind::DeviceRenamed, move |event| {
            let (BusEvent::DeviceRenamed { device, .. }, Some(bus)) = (event, bus.upgrade()) else {
                return Ok(());
            };
            let device = resolver.device(device.as_str())?;
            bus.emit(PathChange::set(
                device_path(device.id()),
                device_node(&device, state.as_ref()).to_value(),
            ))
        });

        let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
        let resolver = self.resolver.clone();
        let state = Arc::clone(&self.state);
        self.bus.subscribe(EventKind::StateChange, move |event| {
            let (
                BusEvent::StateChange {
                    entity: EntityRef::Device(id),
                    ..
                },
                Some(bus),
            ) = (event, bus.upgrade())
            else {
                return Ok(());
            };
            let Some(info) = resolver.network().device(id) else {
                return Ok(());
            };
            let device = resolver.describe(info);
            bus.emit(PathChange::set(
                device_path(id).join("state"),
                Value::Object(device_state(&device, state.as_ref())),
            ))
        });

        let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
        self.bus.subscribe(EventKind::PublishEntityState, move |event| {
            let (
                BusEvent::PublishEntityState {
                    entity: EntityRef::Device(id),
                    payload,
                },
                Some(bus),
            ) = (event, bus.upgrade())
            else {
                return Ok(());
            };
            if !has_event(payload) {
                return Ok(());
            }
            let mut data = payload.clone();
            data.remove("linkquality");
            bus.emit(PathChange::publish(
                device_path(id).join("event"),
                Value::Object(data),
            ))
        });
    }

    /// Listing of every non-coordinator device. Never writes settings.
    #[must_use]
    pub fn tree(&self) -> StateTree {
        let mut tree = StateTree::new();
        for device in self.resolver.devices() {
            tree.insert(device.id().to_string(), device_node(&device, self.state.as_ref()));
        }
        tree
    }

    /// Rendered info of one device, state included.
    #[must_use]
    pub fn info(&self, device: &ResolvedDevice) -> Value {
        device_node(device, self.state.as_ref()).to_value()
    }

    /// Dispatch a request addressed to `devices/<path>`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] for unknown devices or paths, and whatever
    /// the selected operation returns.
    #[tracing::instrument(skip(self, data), fields(path = %path))]
    pub async fn call(
        &self,
        command: Command,
        path: &Path,
        data: Map<String, Value>,
    ) -> Result<Option<Value>, BridgeError> {
        let no_such_command = || -> BridgeError {
            NotFoundError::Command(format!("{NAMESPACE}/{path}")).into()
        };
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
        let Some((id, rest)) = segments.split_first() else {
            return match command {
                Command::Get => Ok(Some(self.tree().to_value())),
                _ => Err(no_such_command()),
            };
        };

        let device = self.resolver.device(id)?;
        match (command, rest) {
            (Command::Get, []) => Ok(Some(self.info(&device))),
            (Command::Set, []) => self.set_properties(&device, data).await.map(|()| None),
            (Command::Delete, []) => {
                let mode = match data.get("mode") {
                    None | Some(Value::Null) => RemoveMode::default(),
                    Some(Value::String(mode)) => mode.parse()?,
                    Some(other) => {
                        return Err(ValidationError::InvalidRemoveMode(other.to_string()).into());
                    }
                };
                self.remove(&device, mode).await.map(|()| None)
            }
            (Command::Get, ["state"]) => Ok(Some(Value::Object(device_state(
                &device,
                self.state.as_ref(),
            )))),
            (Command::Set, ["state"]) => {
                self.set_state(&device, &data).await;
                Ok(None)
            }
            _ => Err(no_such_command()),
        }
    }

    /// Apply every property of `data`, after validating all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownProperty`] before anything is
    /// applied when a key is not a device property.
    pub async fn set_properties(
        &self,
        device: &ResolvedDevice,
        data: Map<String, Value>,
    ) -> Result<(), BridgeError> {
        for property in DeviceProperty::parse_all(data)? {
            match property {
                DeviceProperty::Name(name) => self.rename(device, &name)?,
                DeviceProperty::ForceUpdate(value) => self.force_update(device, &value).await,
                DeviceProperty::Whitelist(enabled) => self.whitelist(device, enabled)?,
                DeviceProperty::Options(options) => self.set_options(device, options)?,
            }
        }
        Ok(())
    }

    /// Run `payload` through the converter pipeline.
    pub async fn set_state(&self, device: &ResolvedDevice, payload: &StateMap) -> bool {
        self.pipeline
            .apply(Operation::Set, &Resolved::Device(device.clone()), payload)
            .await
    }

    /// Ask the device to report attributes.
    ///
    /// `true` (or any non-collection) requests every readable attribute, an
    /// array requests the listed ones, an object is used as the payload and
    /// `false` does nothing.
    pub async fn force_update(&self, device: &ResolvedDevice, attributes: &Value) {
        let payload: StateMap = match attributes {
            Value::Bool(false) => return,
            Value::Object(map) => map.clone(),
            Value::Array(keys) => keys
                .iter()
                .filter_map(Value::as_str)
                .map(|key| (key.to_string(), Value::from("")))
                .collect(),
            _ => device
                .definition
                .as_ref()
                .map(|def| def.readable_keys())
                .unwrap_or_default()
                .into_iter()
                .map(|key| (key, Value::from("")))
                .collect(),
        };
        self.pipeline
            .apply(Operation::Get, &Resolved::Device(device.clone()), &payload)
            .await;
    }

    /// Change the friendly name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] or [`ValidationError::NameTaken`]
    /// when `name` is unusable.
    #[tracing::instrument(skip(self, device), fields(device = %device.id()))]
    pub fn rename(&self, device: &ResolvedDevice, name: &str) -> Result<(), BridgeError> {
        let from = device.name().to_string();
        if from == name {
            return Ok(());
        }
        if self.resolver.settings().name_in_use(name) {
            return Err(ValidationError::NameTaken(name.to_string()).into());
        }
        let mut settings = device.settings.clone();
        settings.friendly_name = name.to_string();
        settings.validate()?;
        self.resolver.settings().put_device(settings)?;
        tracing::info!(%from, to = name, "device renamed");
        self.bus.emit(BusEvent::DeviceRenamed {
            device: device.id().clone(),
            from,
            to: name.to_string(),
        })
    }

    /// Persist the whitelist flag.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings record cannot be persisted.
    pub fn whitelist(&self, device: &ResolvedDevice, enabled: bool) -> Result<(), BridgeError> {
        let mut settings = device.settings.clone();
        settings.whitelisted = enabled;
        self.resolver.settings().put_device(settings)?;
        if enabled {
            tracing::info!(device = %device.name(), "device whitelisted");
        }
        Ok(())
    }

    /// Merge device-specific options into the settings record.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings record cannot be persisted.
    pub fn set_options(
        &self,
        device: &ResolvedDevice,
        options: Map<String, Value>,
    ) -> Result<(), BridgeError> {
        let mut settings = device.settings.clone();
        if let Some(Value::Bool(retrieve)) = options.get("retrieve_state") {
            settings.retrieve_state = *retrieve;
        }
        settings.options.extend(options);
        self.resolver.settings().put_device(settings)?;
        tracing::info!(device = %device.name(), "changed device options");
        Ok(())
    }

    /// Remove `device` from the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Remove`] when the network refuses; the
    /// device record is then kept untouched.
    #[tracing::instrument(skip(self, device), fields(device = %device.id(), mode = %mode))]
    pub async fn remove(&self, device: &ResolvedDevice, mode: RemoveMode) -> Result<(), BridgeError> {
        tracing::info!(name = %device.name(), "removing device");
        let network = self.resolver.network();
        let outcome = if mode.contacts_device() {
            network.request_leave(device.id()).await
        } else {
            network.forget_device(device.id()).await
        };
        if let Err(error) = outcome {
            tracing::error!(%error, "device removal failed");
            return Err(LifecycleError::Remove {
                mode: mode.to_string(),
                reason: error.to_string(),
            }
            .into());
        }

        self.cleanup(device.id(), device.name(), mode)?;

        if mode == RemoveMode::Ban {
            self.resolver.settings().ban(device.id())?;
        }
        Ok(())
    }

    /// The one cleanup routine shared by every way a device goes away.
    fn cleanup(&self, id: &DeviceId, name: &str, mode: RemoveMode) -> Result<(), BridgeError> {
        self.bus.emit(BusEvent::DeviceRemoved {
            device: id.clone(),
            friendly_name: name.to_string(),
            mode,
        })?;
        self.resolver.settings().remove_device(id)?;
        self.state.remove(&EntityRef::Device(id.clone()));
        self.pipeline.forget(&EntityRef::Device(id.clone()));
        tracing::info!(device = %id, name, %mode, "device removed");
        self.bus.emit(PathChange::delete(device_path(id).join("state")))?;
        self.bus.emit(PathChange::delete(device_path(id)))
    }

    /// A device joined: create its record and announce it, unless banned.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings record cannot be created or a
    /// handler fails.
    pub async fn on_device_joined(&self, info: DeviceInfo) -> Result<(), BridgeError> {
        if self.resolver.settings().is_banned(&info.id) {
            tracing::warn!(device = %info.id, "banned device tried to join, removing");
            return self.resolver.network().forget_device(&info.id).await;
        }
        let device = self.resolver.adopt(info)?;
        tracing::info!(device = %device.id(), name = %device.name(), "device joined");
        self.bus.emit(BusEvent::DeviceAdded {
            device: device.id().clone(),
        })?;
        self.bus.emit(PathChange::set(device_path(device.id()), self.info(&device)))
    }

    /// Create the settings record of every device already on the network at
    /// startup. Returns how many were missing one.
    ///
    /// # Errors
    ///
    /// Returns an error when a settings record cannot be persisted.
    pub fn adopt_network_devices(&self) -> Result<usize, BridgeError> {
        let settings = self.resolver.settings();
        let mut adopted = 0;
        for info in self.resolver.network().devices() {
            if info.is_coordinator() || settings.device(&info.id).is_some() {
                continue;
            }
            if settings.is_banned(&info.id) {
                tracing::warn!(device = %info.id, "banned device is still on the network");
                continue;
            }
            self.resolver.adopt(info)?;
            adopted += 1;
        }
        tracing::info!(adopted, "network devices adopted");
        Ok(adopted)
    }

    /// A device left on its own: run the shared cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error when the cleanup fails.
    pub fn on_device_left(&self, id: &DeviceId) -> Result<(), BridgeError> {
        let Some(settings) = self.resolver.settings().device(id) else {
            tracing::debug!(device = %id, "unknown device left");
            return Ok(());
        };
        self.cleanup(id, &settings.friendly_name, RemoveMode::Remove)
    }

    /// Feed one network event into the core.
    pub async fn handle_network_event(&self, event: NetworkEvent) {
        let result = match event {
            NetworkEvent::DeviceJoined(info) => self.on_device_joined(info).await,
            NetworkEvent::DeviceLeft(id) => self.on_device_left(&id),
            NetworkEvent::Report { device, payload } => self
                .publisher
                .publish(&EntityRef::Device(device), &payload)
                .map(|_| ()),
        };
        if let Err(error) = result {
            tracing::error!(%error, "failed to handle network event");
        }
    }

    /// Request every readable attribute of each mains-powered device.
    pub async fn refresh_powered_devices(&self) {
        for device in self
            .resolver
            .devices()
            .into_iter()
            .filter(|d| !d.info.is_battery_powered())
        {
            self.force_update(&device, &Value::Bool(true)).await;
        }
    }
}
