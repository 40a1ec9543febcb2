//! [`StateStore`] backed by a hash map.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use meshbridge_app::ports::StateStore;
use meshbridge_domain::id::EntityRef;
use meshbridge_domain::state::StateMap;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<EntityRef, StateMap>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, entity: &EntityRef) -> Option<StateMap> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(entity).cloned()
    }

    fn set(&self, entity: &EntityRef, state: StateMap) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entity.clone(), state);
    }

    fn remove(&self, entity: &EntityRef) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(entity);
    }
}
