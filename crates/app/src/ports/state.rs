//! State store port: last known attribute state per entity.

use meshbridge_domain::id::EntityRef;
use meshbridge_domain::state::StateMap;

/// Cache of the most recent state of every entity.
pub trait StateStore: Send + Sync {
    fn get(&self, entity: &EntityRef) -> Option<StateMap>;

    fn set(&self, entity: &EntityRef, state: StateMap);

    fn remove(&self, entity: &EntityRef);

    /// Cached state, or an empty map.
    fn get_or_default(&self, entity: &EntityRef) -> StateMap {
        self.get(entity).unwrap_or_default()
    }
}
