//! Groups delegate: owns the `groups` namespace: lifecycle, membership and
//! scenes.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use serde_json::{Map, Value, json};

use meshbridge_domain::envelope::Command;
use meshbridge_domain::error::{BridgeError, NotFoundError, ValidationError};
use meshbridge_domain::event::{BusEvent, EventKind, PathChange};
use meshbridge_domain::group::{GroupSettings, MemberKey, Scene};
use meshbridge_domain::id::{DeviceId, EntityRef, GroupId};
use meshbridge_domain::path::Path;
use meshbridge_domain::tree::StateTree;

use crate::event_bus::EventBus;
use crate::pipeline::ConverterPipeline;
use crate::ports::converter::{readable_keys, writable_keys};
use crate::ports::{Operation, SettingsStore, StateStore};
use crate::resolver::{Resolved, ResolvedDevice, ResolvedGroup, Resolver};

const NAMESPACE: &str = "groups";

/// Endpoint never joined to a group.
const SYSTEM_ENDPOINT: &str = "system";

#[derive(Debug, Clone, PartialEq)]
enum GroupProperty {
    Name(String),
    Devices(Vec<String>),
    Options(Map<String, Value>),
}

impl GroupProperty {
    fn parse_all(data: Map<String, Value>) -> Result<Vec<Self>, ValidationError> {
        data.into_iter()
            .map(|(key, value)| match (key.as_str(), value) {
                ("name", Value::String(name)) => Ok(Self::Name(name)),
                ("name", _) => Err(invalid("name", "expected a string")),
                ("devices", Value::Array(items)) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        other => Err(invalid("devices", format!("'{other}' is not a string"))),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Devices),
                ("devices", _) => Err(invalid("devices", "expected an array")),
                ("options", Value::Object(options)) => Ok(Self::Options(options)),
                ("options", _) => Err(invalid("options", "expected an object")),
                _ => Err(ValidationError::UnknownProperty(key)),
            })
            .collect()
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn group_path(id: GroupId) -> Path {
    [NAMESPACE.to_string(), id.to_string()].into_iter().collect()
}

/// Parse an optional group id given as a number or a numeric string.
fn parse_group_id(value: Option<&Value>) -> Result<Option<GroupId>, ValidationError> {
    let reason = || invalid("id", "expected a number between 1 and 65535");
    let id = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(Value::String(s)) => s.parse::<u16>().ok(),
        Some(_) => None,
    };
    match id {
        Some(id) if id > 0 => Ok(Some(GroupId::new(id))),
        _ => Err(reason()),
    }
}

fn group_node(group: &GroupSettings, state: &dyn StateStore, caps: &Capabilities) -> StateTree {
    let mut node = StateTree::opaque();
    node.insert("name", json!(group.friendly_name));
    node.insert("devices", json!(group.devices));
    node.insert("scenes", json!(group.scenes));
    node.insert("writable", json!(caps.writable));
    node.insert("readable", json!(caps.readable));
    node.insert(
        "state",
        StateTree::opaque_from(&state.get_or_default(&EntityRef::Group(group.id))),
    );
    node
}

/// Attribute keys the fixed group converter set exposes.
#[derive(Debug, Clone)]
struct Capabilities {
    writable: Vec<String>,
    readable: Vec<String>,
}

impl Capabilities {
    fn of(resolver: &Resolver) -> Self {
        let descriptors = resolver.registry().group_capabilities();
        Self {
            writable: writable_keys(&descriptors),
            readable: readable_keys(&descriptors),
        }
    }
}

/// Delegate for the `groups` namespace.
pub struct GroupsApi {
    resolver: Resolver,
    state: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    pipeline: ConverterPipeline,
}

impl GroupsApi {
    pub fn new(
        resolver: Resolver,
        state: Arc<dyn StateStore>,
        bus: Arc<EventBus>,
        pipeline: ConverterPipeline,
    ) -> Self {
        Self {
            resolver,
            state,
            bus,
            pipeline,
        }
    }

    fn settings(&self) -> &Arc<dyn SettingsStore> {
        self.resolver.settings()
    }

    /// Register the handlers turning group events into path changes.
    pub fn subscribe(&self) {
        for kind in [
            EventKind::GroupAdded,
            EventKind::GroupRenamed,
            EventKind::GroupMemberAdded,
            EventKind::GroupMemberRemoved,
        ] {
            let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
            let resolver = self.resolver.clone();
            let state = Arc::clone(&self.state);
            self.bus.subscribe(kind, move |event| {
                let group = match event {
                    BusEvent::GroupAdded { group, .. }
                    | BusEvent::GroupRenamed { group, .. }
                    | BusEvent::GroupMemberAdded { group, .. }
                    | BusEvent::GroupMemberRemoved { group, .. } => *group,
                    _ => return Ok(()),
                };
                let (Some(bus), Some(settings)) = (bus.upgrade(), resolver.settings().group(group))
                else {
                    return Ok(());
                };
                let node = group_node(&settings, state.as_ref(), &Capabilities::of(&resolver));
                bus.emit(PathChange::set(group_path(group), node.to_value()))
            });
        }

        let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
        self.bus.subscribe(EventKind::GroupRemoved, move |event| {
            match (event, bus.upgrade()) {
                (BusEvent::GroupRemoved { group, .. }, Some(bus)) => {
                    bus.emit(PathChange::delete(group_path(*group).join("state")))?;
                    bus.emit(PathChange::delete(group_path(*group)))
                }
                _ => Ok(()),
            }
        });

        let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
        self.bus.subscribe(EventKind::StateChange, move |event| {
            match (event, bus.upgrade()) {
                (
                    BusEvent::StateChange {
                        entity: EntityRef::Group(group),
                        to,
                        ..
                    },
                    Some(bus),
                ) => bus.emit(PathChange::set(
                    group_path(*group).join("state"),
                    Value::Object(to.clone()),
                )),
                _ => Ok(()),
            }
        });

        let bus: Weak<EventBus> = Arc::downgrade(&self.bus);
        let resolver = self.resolver.clone();
        let state = Arc::clone(&self.state);
        self.bus.subscribe(EventKind::DeviceRemoved, move |event| {
            let (BusEvent::DeviceRemoved { device, .. }, Some(bus)) = (event, bus.upgrade()) else {
                return Ok(());
            };
            let settings = resolver.settings();
            for mut group in settings.groups().into_iter().filter(|g| g.has_member(device)) {
                group.devices.retain(|m| &m.device != device);
                for scene in group.scenes.values_mut() {
                    scene.state.remove(device);
                }
                settings.put_group(group.clone())?;
                tracing::info!(group = %group.friendly_name, %device, "dropped removed device from group");
                let node = group_node(&group, state.as_ref(), &Capabilities::of(&resolver));
                bus.emit(PathChange::set(group_path(group.id), node.to_value()))?;
            }
            Ok(())
        });
    }

    /// Listing of every group.
    #[must_use]
    pub fn tree(&self) -> StateTree {
        let caps = Capabilities::of(&self.resolver);
        let mut tree = StateTree::new();
        for group in self.resolver.groups() {
            tree.insert(
                group.id().to_string(),
                group_node(&group.settings, self.state.as_ref(), &caps),
            );
        }
        tree
    }

    #[must_use]
    pub fn info(&self, group: &ResolvedGroup) -> Value {
        group_node(&group.settings, self.state.as_ref(), &Capabilities::of(&self.resolver)).to_value()
    }

    /// Dispatch a request addressed to `groups/<path>`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] for unknown groups, scenes or paths, and
    /// whatever the selected operation returns.
    #[tracing::instrument(skip(self, data), fields(path = %path))]
    pub async fn call(
        &self,
        command: Command,
        path: &Path,
        mut data: Map<String, Value>,
    ) -> Result<Option<Value>, BridgeError> {
        let no_such_command = || -> BridgeError {
            NotFoundError::Command(format!("{NAMESPACE}/{path}")).into()
        };
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
        let Some((id, rest)) = segments.split_first() else {
            return match command {
                Command::Get => Ok(Some(self.tree().to_value())),
                Command::Create => self.create(data).await.map(Some),
                _ => Err(no_such_command()),
            };
        };

        let group = self.resolver.group(id)?;
        match (command, rest) {
            (Command::Get, []) => Ok(Some(self.info(&group))),
            (Command::Set, []) => self.set_properties(&group, data).await.map(|()| None),
            (Command::Delete, []) => self.remove(&group).await.map(|()| None),
            (Command::Get, ["state"]) => Ok(Some(Value::Object(
                self.state.get_or_default(&group.entity()),
            ))),
            (Command::Set, ["state"]) => {
                self.pipeline
                    .apply(Operation::Set, &Resolved::Group(group), &data)
                    .await;
                Ok(None)
            }
            (Command::Get, ["scenes"]) => Ok(Some(json!(group.settings.scenes))),
            (Command::Create, ["scenes"]) => {
                let name = match data.remove("name") {
                    Some(Value::String(name)) if !name.trim().is_empty() => name,
                    Some(_) => return Err(invalid("name", "expected a non-empty string").into()),
                    None => return Err(ValidationError::MissingField("name").into()),
                };
                self.store_scene(&group, &name, data.remove("state")).map(|()| None)
            }
            (Command::Get, ["scenes", name]) => group
                .settings
                .scenes
                .get(*name)
                .map(|scene| Some(json!(scene)))
                .ok_or_else(|| NotFoundError::Scene((*name).to_string()).into()),
            (Command::Set, ["scenes", name]) => self
                .store_scene(&group, name, data.remove("state"))
                .map(|()| None),
            (Command::Delete, ["scenes", name]) => self.delete_scene(&group, name).map(|()| None),
            (Command::Set, ["scenes", name, "recall"]) => {
                self.recall_scene(&group, name).await.map(|()| None)
            }
            _ => Err(no_such_command()),
        }
    }

    /// Create a group from `{name, id?, ...properties}` and return `{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the name is missing or taken, or the
    /// requested id is invalid or taken.
    #[tracing::instrument(skip(self, data))]
    pub async fn create(&self, mut data: Map<String, Value>) -> Result<Value, BridgeError> {
        let name = match data.remove("name") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(invalid("name", "expected a string").into()),
            None => return Err(ValidationError::MissingField("name").into()),
        };
        let id = match parse_group_id(data.remove("id").as_ref())? {
            Some(id) if self.settings().group(id).is_some() => {
                return Err(ValidationError::GroupIdTaken(id.value()).into());
            }
            Some(id) => id,
            None => self.next_free_id()?,
        };
        if self.settings().name_in_use(&name) {
            return Err(ValidationError::NameTaken(name).into());
        }
        let settings = GroupSettings::new(id, name.clone());
        settings.validate()?;

        self.resolver.network().create_group(id).await?;
        self.settings().put_group(settings.clone())?;
        tracing::info!(group = %name, %id, "group created");
        self.bus.emit(BusEvent::GroupAdded {
            group: id,
            friendly_name: name,
        })?;

        if !data.is_empty() {
            self.set_properties(&ResolvedGroup { settings }, data).await?;
        }
        Ok(json!({ "id": id.value() }))
    }

    fn next_free_id(&self) -> Result<GroupId, BridgeError> {
        let taken: Vec<u16> = self.settings().groups().iter().map(|g| g.id.value()).collect();
        (1..=u16::MAX)
            .find(|id| !taken.contains(id))
            .map(GroupId::new)
            .ok_or_else(|| invalid("id", "no free group id left").into())
    }

    /// Apply every property of `data`, after validating all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownProperty`] before anything is
    /// applied when a key is not a group property.
    pub async fn set_properties(
        &self,
        group: &ResolvedGroup,
        data: Map<String, Value>,
    ) -> Result<(), BridgeError> {
        for property in GroupProperty::parse_all(data)? {
            match property {
                GroupProperty::Name(name) => self.rename(group.id(), &name)?,
                GroupProperty::Devices(keys) => {
                    let mut desired = Vec::new();
                    for key in &keys {
                        for member in self.members_for(key)? {
                            if !desired.contains(&member) {
                                desired.push(member);
                            }
                        }
                    }
                    self.sync_members(group.id(), &desired).await?;
                }
                GroupProperty::Options(options) => {
                    let mut settings = self.current(group.id())?;
                    settings.options.extend(options);
                    self.settings().put_group(settings)?;
                }
            }
        }
        Ok(())
    }

    /// Fresh copy of the persisted record; earlier properties may have changed it.
    fn current(&self, id: GroupId) -> Result<GroupSettings, BridgeError> {
        self.settings()
            .group(id)
            .ok_or_else(|| NotFoundError::Group(id.to_string()).into())
    }

    /// Change the friendly name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] or [`ValidationError::NameTaken`].
    pub fn rename(&self, id: GroupId, name: &str) -> Result<(), BridgeError> {
        let mut settings = self.current(id)?;
        let from = settings.friendly_name.clone();
        if from == name {
            return Ok(());
        }
        if self.settings().name_in_use(name) {
            return Err(ValidationError::NameTaken(name.to_string()).into());
        }
        settings.friendly_name = name.to_string();
        settings.validate()?;
        self.settings().put_group(settings)?;
        tracing::info!(%from, to = name, "group renamed");
        self.bus.emit(BusEvent::GroupRenamed {
            group: id,
            from,
            to: name.to_string(),
        })
    }

    /// Endpoints of the device named by `key` that take part in groups.
    ///
    /// `key` is a device id or name, optionally followed by `/<endpoint>`
    /// (an endpoint name or number). Without an endpoint every named
    /// endpoint but `system` joins, or the primary one for single-endpoint
    /// devices.
    fn members_for(&self, key: &str) -> Result<Vec<MemberKey>, BridgeError> {
        if let Ok(device) = self.resolver.device(key) {
            return Ok(default_members(&device));
        }
        let Some((device_key, endpoint)) = key.rsplit_once('/') else {
            return Err(NotFoundError::Device(key.to_string()).into());
        };
        let device = self.resolver.device(device_key)?;
        let id = endpoint
            .parse::<u8>()
            .ok()
            .or_else(|| device.definition.as_ref().and_then(|d| d.endpoint_id(endpoint)))
            .filter(|id| device.info.endpoints.contains(id))
            .ok_or_else(|| NotFoundError::Endpoint {
                device: device.name().to_string(),
                endpoint: endpoint.to_string(),
            })?;
        Ok(vec![MemberKey::new(device.id().clone(), id)])
    }

    /// Move the persisted membership to `desired`: new members join, stale
    /// ones leave.
    async fn sync_members(&self, group: GroupId, desired: &[MemberKey]) -> Result<(), BridgeError> {
        let persisted = self.current(group)?.devices;
        for member in persisted.iter().filter(|m| !desired.contains(m)) {
            self.leave(group, member).await?;
        }
        for member in desired.iter().filter(|m| !persisted.contains(m)) {
            self.join(group, member).await?;
        }
        Ok(())
    }

    async fn join(&self, group: GroupId, member: &MemberKey) -> Result<(), BridgeError> {
        self.resolver
            .network()
            .add_to_group(group, &member.device, member.endpoint)
            .await?;
        let mut settings = self.current(group)?;
        settings.devices.push(member.clone());
        self.settings().put_group(settings)?;
        tracing::info!(%group, %member, "added member to group");
        self.bus.emit(BusEvent::GroupMemberAdded {
            group,
            device: member.device.clone(),
            endpoint: member.endpoint,
        })
    }

    async fn leave(&self, group: GroupId, member: &MemberKey) -> Result<(), BridgeError> {
        if self.resolver.network().device(&member.device).is_some() {
            self.resolver
                .network()
                .remove_from_group(group, &member.device, member.endpoint)
                .await?;
        }
        let mut settings = self.current(group)?;
        settings.devices.retain(|m| m != member);
        if !settings.has_member(&member.device) {
            for scene in settings.scenes.values_mut() {
                scene.state.remove(&member.device);
            }
        }
        self.settings().put_group(settings)?;
        tracing::info!(%group, %member, "removed member from group");
        self.bus.emit(BusEvent::GroupMemberRemoved {
            group,
            device: member.device.clone(),
            endpoint: member.endpoint,
        })
    }

    /// Join `device` (id or name, optionally `/<endpoint>`) to `group`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] when either side does not exist.
    pub async fn add_device(&self, group: &str, device: &str) -> Result<(), BridgeError> {
        let group = self.resolver.group(group)?;
        let mut desired = group.settings.devices.clone();
        for member in self.members_for(device)? {
            if !desired.contains(&member) {
                desired.push(member);
            }
        }
        self.sync_members(group.id(), &desired).await
    }

    /// Remove every endpoint of `device` from `group`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] when the group does not exist.
    pub async fn remove_device(&self, group: &str, device: &str) -> Result<(), BridgeError> {
        let group = self.resolver.group(group)?;
        let id = self.device_id_for(device);
        let desired: Vec<MemberKey> = group
            .settings
            .devices
            .iter()
            .filter(|m| m.device != id)
            .cloned()
            .collect();
        self.sync_members(group.id(), &desired).await
    }

    /// Address of a device that may already have left the network.
    fn device_id_for(&self, key: &str) -> DeviceId {
        match self.resolver.device(key) {
            Ok(device) => device.id().clone(),
            Err(_) => self
                .settings()
                .device_by_name(key)
                .map_or_else(|| DeviceId::new(key), |s| s.id),
        }
    }

    /// Delete the group from the network and from the settings.
    ///
    /// # Errors
    ///
    /// Returns the network error when the group cannot be removed.
    #[tracing::instrument(skip(self, group), fields(group = %group.name()))]
    pub async fn remove(&self, group: &ResolvedGroup) -> Result<(), BridgeError> {
        self.resolver.network().remove_group(group.id()).await?;
        self.settings().remove_group(group.id())?;
        self.state.remove(&group.entity());
        self.pipeline.forget(&group.entity());
        tracing::info!("group removed");
        self.bus.emit(BusEvent::GroupRemoved {
            group: group.id(),
            friendly_name: group.name().to_string(),
        })
    }

    /// Store a scene: the given per-member state, or a snapshot of every
    /// member's current state.
    fn store_scene(
        &self,
        group: &ResolvedGroup,
        name: &str,
        state: Option<Value>,
    ) -> Result<(), BridgeError> {
        let mut settings = self.current(group.id())?;
        let scene = match state {
            None | Some(Value::Null) => Scene {
                state: settings
                    .member_devices()
                    .into_iter()
                    .map(|device| {
                        let state = self.state.get_or_default(&EntityRef::Device(device.clone()));
                        (device, state)
                    })
                    .collect(),
            },
            Some(Value::Object(by_device)) => {
                let mut state = BTreeMap::new();
                for (key, value) in by_device {
                    let Value::Object(member_state) = value else {
                        return Err(invalid("state", format!("state of '{key}' is not an object")).into());
                    };
                    state.insert(self.device_id_for(&key), member_state);
                }
                Scene { state }
            }
            Some(_) => return Err(invalid("state", "expected an object").into()),
        };
        settings.check_scene(name, &scene)?;
        settings.scenes.insert(name.to_string(), scene);
        self.settings().put_group(settings)?;
        tracing::info!(group = %group.name(), scene = name, "scene stored");
        self.emit_group(group.id())
    }

    fn delete_scene(&self, group: &ResolvedGroup, name: &str) -> Result<(), BridgeError> {
        let mut settings = self.current(group.id())?;
        if settings.scenes.remove(name).is_none() {
            return Err(NotFoundError::Scene(name.to_string()).into());
        }
        self.settings().put_group(settings)?;
        self.emit_group(group.id())
    }

    /// Replay every stored member state through the set pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Scene`] when the scene does not exist.
    pub async fn recall_scene(&self, group: &ResolvedGroup, name: &str) -> Result<(), BridgeError> {
        let scene = group
            .settings
            .scenes
            .get(name)
            .ok_or_else(|| NotFoundError::Scene(name.to_string()))?;
        tracing::info!(group = %group.name(), scene = name, "recalling scene");
        for (device, state) in &scene.state {
            match self.resolver.device(device.as_str()) {
                Ok(device) => {
                    self.pipeline
                        .apply(Operation::Set, &Resolved::Device(device), state)
                        .await;
                }
                Err(error) => tracing::warn!(%device, %error, "skipping scene member"),
            }
        }
        Ok(())
    }

    fn emit_group(&self, id: GroupId) -> Result<(), BridgeError> {
        let settings = self.current(id)?;
        let node = group_node(&settings, self.state.as_ref(), &Capabilities::of(&self.resolver));
        self.bus.emit(PathChange::set(group_path(id), node.to_value()))
    }
}

fn default_members(device: &ResolvedDevice) -> Vec<MemberKey> {
    let named: Vec<u8> = device
        .definition
        .as_ref()
        .map(|def| {
            def.endpoints
                .iter()
                .filter(|(name, id)| name.as_str() != SYSTEM_ENDPOINT && device.info.endpoints.contains(id))
                .map(|(_, id)| *id)
                .collect()
        })
        .unwrap_or_default();
    let endpoints = if named.is_empty() {
        device.info.primary_endpoint().into_iter().collect()
    } else {
        named
    };
    endpoints
        .into_iter()
        .map(|endpoint| MemberKey::new(device.id().clone(), endpoint))
        .collect()
}
