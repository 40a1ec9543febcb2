//! Entity state publisher: the single entry point for new entity state.
//!
//! Converter results and network reports both land here: the update is
//! merged into the state store, announced as `PublishEntityState`, and, when
//! the cached state actually changed, as `StateChange`.

use std::sync::Arc;

use meshbridge_domain::error::BridgeError;
use meshbridge_domain::event::BusEvent;
use meshbridge_domain::id::EntityRef;
use meshbridge_domain::state::{StateMap, is_event_key, merge};

use crate::event_bus::EventBus;
use crate::ports::StateStore;

#[derive(Clone)]
pub struct EntityStatePublisher {
    bus: Arc<EventBus>,
    state: Arc<dyn StateStore>,
}

impl EntityStatePublisher {
    pub fn new(bus: Arc<EventBus>, state: Arc<dyn StateStore>) -> Self {
        Self { bus, state }
    }

    /// Merge `update` into the cached state of `entity` and announce it.
    ///
    /// Event keys (`action`, `click`, …) are announced but never cached.
    /// Returns the merged state.
    ///
    /// # Errors
    ///
    /// Propagates the first failing event-bus handler.
    pub fn publish(&self, entity: &EntityRef, update: &StateMap) -> Result<StateMap, BridgeError> {
        let current = self.state.get_or_default(entity);
        let cacheable: StateMap = update
            .iter()
            .filter(|(key, _)| !is_event_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let merged = merge(&current, &cacheable);
        let changed = merged != current;
        if changed {
            self.state.set(entity, merged.clone());
        }

        self.bus.emit(BusEvent::PublishEntityState {
            entity: entity.clone(),
            payload: update.clone(),
        })?;

        if changed {
            tracing::debug!(entity = %entity.key(), "state changed");
            self.bus.emit(BusEvent::StateChange {
                entity: entity.clone(),
                from: current,
                to: merged.clone(),
            })?;
        }
        Ok(merged)
    }
}
