//! Converter pipeline: executes an attribute bag against an entity.
//!
//! For every key of the payload, in a direction-dependent order, the
//! pipeline picks the capability descriptor covering it, resolves the
//! concrete target (possibly a named endpoint given by a `_<endpoint>`
//! suffix) and invokes the descriptor's converter once per target. Failures
//! are per attribute: they are logged and the remaining keys still run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use meshbridge_domain::endpoint::{ENDPOINT_SCOPED_KEYS, split_endpoint_suffix, with_endpoint_suffix};
use meshbridge_domain::id::EntityRef;
use meshbridge_domain::state::{STATE_LIKE_KEYS, StateMap, is_turning_off};

use crate::ports::{
    CapabilityDescriptor, ConvertContext, Converter, Definition, Operation, StateStore, Target,
};
use crate::ports::converter::find_descriptor;
use crate::publisher::EntityStatePublisher;
use crate::resolver::{Resolved, ResolvedDevice, ResolvedGroup, Resolver};

/// One async mutex per entity, created on first use.
#[derive(Default)]
pub struct EntityLocks(DashMap<String, Arc<Mutex<()>>>);

impl EntityLocks {
    fn key(entity: &EntityRef) -> String {
        format!("{}/{}", entity.namespace(), entity.key())
    }

    #[must_use]
    pub fn lock_for(&self, entity: &EntityRef) -> Arc<Mutex<()>> {
        Arc::clone(self.0.entry(Self::key(entity)).or_default().value())
    }

    /// Drop the mutex of a removed entity. Current holders keep their clone.
    pub fn remove(&self, entity: &EntityRef) {
        self.0.remove(&Self::key(entity));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Order in which the keys of `payload` execute.
///
/// `state`, `brightness` and `brightness_percent` go last when the payload
/// turns the entity off and first otherwise. Other keys keep their relative
/// order.
#[must_use]
pub fn execution_order(payload: &StateMap) -> Vec<(&str, &Value)> {
    let (state_like, others): (Vec<_>, Vec<_>) = payload
        .iter()
        .map(|(key, value)| (key.as_str(), value))
        .partition(|(key, _)| STATE_LIKE_KEYS.contains(key));
    if is_turning_off(payload) {
        others.into_iter().chain(state_like).collect()
    } else {
        state_like.into_iter().chain(others).collect()
    }
}

/// Where one key of the payload goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'k> {
    /// The entity's default target.
    Default(&'k str),
    /// A named endpoint taken from the key's suffix.
    Endpoint { key: &'k str, name: &'k str, id: u8 },
    /// The suffix names an endpoint this device does not have.
    UnknownEndpoint { name: &'k str },
}

/// Split an endpoint suffix off `key` and map it onto the device's endpoints.
#[must_use]
pub fn route_key<'k>(key: &'k str, device: &ResolvedDevice) -> Route<'k> {
    let Some((base, name)) = split_endpoint_suffix(key) else {
        return Route::Default(key);
    };
    let id = device
        .definition
        .as_deref()
        .and_then(|def| def.endpoint_id(name))
        .filter(|id| device.info.endpoints.contains(id));
    match id {
        Some(id) => Route::Endpoint {
            key: base,
            name,
            id,
        },
        None => Route::UnknownEndpoint { name },
    }
}

/// Suffix the endpoint-scoped keys of a converter result with `endpoint`.
#[must_use]
pub fn scope_state(state: StateMap, endpoint: &str) -> StateMap {
    state
        .into_iter()
        .map(|(key, value)| {
            if ENDPOINT_SCOPED_KEYS.contains(&key.as_str()) {
                (with_endpoint_suffix(&key, endpoint), value)
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Everything needed to run a payload against one entity.
struct Plan {
    entity: EntityRef,
    name: String,
    descriptors: Vec<CapabilityDescriptor>,
    target: Target,
    endpoint_name: Option<String>,
    device: Option<ResolvedDevice>,
    definitions: Vec<Arc<Definition>>,
    retrieve_state: bool,
}

/// A deferred read scheduled after a set.
struct DeferredRead {
    entity: EntityRef,
    converter: Arc<dyn Converter>,
    target: Target,
    key: String,
    ctx: ConvertContext,
    delay: Duration,
}

#[derive(Clone)]
pub struct ConverterPipeline {
    resolver: Resolver,
    state: Arc<dyn StateStore>,
    publisher: EntityStatePublisher,
    locks: Arc<EntityLocks>,
}

impl ConverterPipeline {
    pub fn new(
        resolver: Resolver,
        state: Arc<dyn StateStore>,
        publisher: EntityStatePublisher,
    ) -> Self {
        Self {
            resolver,
            state,
            publisher,
            locks: Arc::new(EntityLocks::default()),
        }
    }

    /// Forget per-entity bookkeeping once `entity` is removed.
    pub fn forget(&self, entity: &EntityRef) {
        self.locks.remove(entity);
    }

    /// Number of entities holding a lock slot.
    #[must_use]
    pub fn tracked_entities(&self) -> usize {
        self.locks.len()
    }

    /// Run `payload` against `entity`.
    ///
    /// Returns `false` when the entity has no capability descriptors (an
    /// unsupported device), `true` otherwise. Per-attribute failures are
    /// logged, never returned.
    #[tracing::instrument(skip(self, entity, payload), fields(entity = %entity.name()))]
    pub async fn apply(&self, operation: Operation, entity: &Resolved, payload: &StateMap) -> bool {
        let Some(plan) = self.plan(entity) else {
            return false;
        };

        let lock = self.locks.lock_for(&plan.entity);
        let _guard = lock.lock().await;

        let cached = self.state.get_or_default(&plan.entity);
        let mut used: HashSet<(Target, usize)> = HashSet::new();

        for (raw_key, value) in execution_order(payload) {
            let (key, target, endpoint_name, scoped) = match &plan.device {
                Some(device) => match route_key(raw_key, device) {
                    Route::Default(key) => (key, plan.target.clone(), plan.endpoint_name.clone(), None),
                    Route::Endpoint { key, name, id } => (
                        key,
                        Target::Endpoint {
                            device: device.info.id.clone(),
                            endpoint: id,
                        },
                        Some(name.to_string()),
                        Some(name),
                    ),
                    Route::UnknownEndpoint { name } => {
                        tracing::error!(
                            entity = %plan.name,
                            endpoint = name,
                            "device has no such endpoint"
                        );
                        continue;
                    }
                },
                None => (raw_key, plan.target.clone(), None, None),
            };

            let Some((index, descriptor)) = find_descriptor(&plan.descriptors, key) else {
                tracing::error!(key, value = %value, "no converter available");
                continue;
            };
            if used.contains(&(target.clone(), index)) {
                continue;
            }

            let ctx = ConvertContext {
                entity: plan.entity.clone(),
                endpoint_name,
                options: entity.options().clone(),
                message: payload.clone(),
                state: cached.clone(),
                definitions: plan.definitions.clone(),
            };
            let converter = Arc::clone(&descriptor.converter);

            match operation {
                Operation::Set if converter.supports(Operation::Set) => {
                    tracing::debug!(key, entity = %plan.name, "publishing set");
                    match converter.convert_set(&target, key, value, &ctx).await {
                        Ok(Some(outcome)) => {
                            if let Some(state) = outcome.state {
                                let state = match scoped {
                                    Some(endpoint) => scope_state(state, endpoint),
                                    None => state,
                                };
                                if let Err(error) = self.publisher.publish(&plan.entity, &state) {
                                    tracing::error!(key, %error, "failed to publish converter state");
                                }
                            }
                            if let Some(delay) = outcome.read_after_write
                                && plan.device.is_some()
                                && plan.retrieve_state
                                && converter.supports(Operation::Get)
                            {
                                self.schedule_read(DeferredRead {
                                    entity: plan.entity.clone(),
                                    converter: Arc::clone(&converter),
                                    target: target.clone(),
                                    key: key.to_string(),
                                    ctx,
                                    delay,
                                });
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            tracing::error!(
                                operation = %operation,
                                key,
                                entity = %plan.name,
                                %error,
                                "publish failed"
                            );
                        }
                    }
                }
                Operation::Get if converter.supports(Operation::Get) => {
                    tracing::debug!(key, entity = %plan.name, "publishing get");
                    if let Err(error) = converter.convert_get(&target, key, &ctx).await {
                        tracing::error!(
                            operation = %operation,
                            key,
                            entity = %plan.name,
                            %error,
                            "publish failed"
                        );
                    }
                }
                _ => {
                    tracing::error!(operation = %operation, key, "no converter available for operation");
                    continue;
                }
            }

            used.insert((target, index));
        }

        true
    }

    fn plan(&self, entity: &Resolved) -> Option<Plan> {
        match entity {
            Resolved::Device(device) => {
                let Some(definition) = device.definition.clone() else {
                    tracing::warn!(
                        model_id = device.info.model_id.as_deref().unwrap_or_default(),
                        "device is not supported"
                    );
                    return None;
                };
                let Some(endpoint) = device.info.primary_endpoint() else {
                    tracing::warn!(entity = %device.name(), "device exposes no endpoint");
                    return None;
                };
                Some(Plan {
                    entity: device.entity(),
                    name: device.name().to_string(),
                    descriptors: definition.capabilities.clone(),
                    target: Target::Endpoint {
                        device: device.info.id.clone(),
                        endpoint,
                    },
                    endpoint_name: definition.endpoint_name(endpoint).map(str::to_string),
                    retrieve_state: device.settings.retrieve_state,
                    device: Some(device.clone()),
                    definitions: vec![definition],
                })
            }
            Resolved::Group(group) => Some(Plan {
                entity: group.entity(),
                name: group.name().to_string(),
                descriptors: self.resolver.registry().group_capabilities(),
                target: Target::Group(group.id()),
                endpoint_name: None,
                device: None,
                definitions: self.member_definitions(group),
                retrieve_state: false,
            }),
        }
    }

    /// Definitions of a group's members, one per supported device.
    fn member_definitions(&self, group: &ResolvedGroup) -> Vec<Arc<Definition>> {
        group
            .settings
            .member_devices()
            .iter()
            .filter_map(|id| self.resolver.network().device(id))
            .filter_map(|info| self.resolver.registry().find_by_device(&info))
            .collect()
    }

    /// Fire-and-forget re-read. Skipped when the entity is gone by then.
    fn schedule_read(&self, read: DeferredRead) {
        let resolver = self.resolver.clone();
        let locks = Arc::clone(&self.locks);
        tokio::spawn(async move {
            tokio::time::sleep(read.delay).await;
            let still_there = match &read.entity {
                EntityRef::Device(id) => {
                    resolver.network().device(id).is_some()
                        && resolver.settings().device(id).is_some()
                }
                EntityRef::Group(id) => resolver.settings().group(*id).is_some(),
            };
            if !still_there {
                tracing::debug!(entity = %read.entity.key(), key = %read.key, "entity removed, skipping read");
                return;
            }
            let lock = locks.lock_for(&read.entity);
            let _guard = lock.lock().await;
            if let Err(error) = read
                .converter
                .convert_get(&read.target, &read.key, &read.ctx)
                .await
            {
                tracing::debug!(key = %read.key, %error, "read after write failed");
            }
        });
    }
}
