//! Attribute state bags.
//!
//! State is schemaless: whatever keys the converters produce. It travels as a
//! JSON object with insertion order preserved.

use serde_json::{Map, Value};

/// Attribute name → value.
pub type StateMap = Map<String, Value>;

/// Keys whose ordering depends on the on/off direction of a command.
pub const STATE_LIKE_KEYS: &[&str] = &["state", "brightness", "brightness_percent"];

/// Key prefixes of ephemeral occurrences such as button presses.
pub const EVENT_KEYS: &[&str] = &["action", "button", "click"];

/// Whether `key` is an event key, optionally suffixed (`action`, `click_left`).
#[must_use]
pub fn is_event_key(key: &str) -> bool {
    EVENT_KEYS.iter().any(|prefix| {
        key.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
    })
}

/// Whether `payload` carries a non-empty event key.
#[must_use]
pub fn has_event(payload: &StateMap) -> bool {
    payload
        .iter()
        .any(|(key, value)| is_event_key(key) && value.as_str() != Some(""))
}

/// Whether `payload.state` is the string `off`, case-insensitively.
#[must_use]
pub fn is_turning_off(payload: &StateMap) -> bool {
    payload
        .get("state")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("off"))
}

/// Whether the cached state says the entity is on.
#[must_use]
pub fn is_on(state: &StateMap) -> bool {
    state
        .get("state")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("on"))
}

/// Deep-merge `update` onto a copy of `current`.
///
/// Nested objects merge key by key; every other value replaces.
#[must_use]
pub fn merge(current: &StateMap, update: &StateMap) -> StateMap {
    let mut out = current.clone();
    for (key, value) in update {
        match (out.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                *existing = merge(existing, incoming);
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}
