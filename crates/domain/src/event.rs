//! Event: the closed vocabulary carried by the in-process event bus.
//!
//! Every [`BusEvent`] variant has exactly one [`EventKind`]; subscribers
//! register against the kind and receive the typed payload. Misspelled event
//! names are a compile error, and the only runtime parsing of kind names
//! ([`EventKind::from_str`]) rejects anything outside the list.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::RemoveMode;
use crate::error::ValidationError;
use crate::id::{DeviceId, EntityRef, GroupId};
use crate::path::Path;
use crate::state::StateMap;

/// Discriminant of [`BusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    DeviceAdded,
    DeviceRenamed,
    DeviceRemoved,
    GroupAdded,
    GroupRenamed,
    GroupRemoved,
    GroupMemberAdded,
    GroupMemberRemoved,
    PublishEntityState,
    StateChange,
    PathChange,
}

impl EventKind {
    pub const ALL: [Self; 11] = [
        Self::DeviceAdded,
        Self::DeviceRenamed,
        Self::DeviceRemoved,
        Self::GroupAdded,
        Self::GroupRenamed,
        Self::GroupRemoved,
        Self::GroupMemberAdded,
        Self::GroupMemberRemoved,
        Self::PublishEntityState,
        Self::StateChange,
        Self::PathChange,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceAdded => "deviceAdded",
            Self::DeviceRenamed => "deviceRenamed",
            Self::DeviceRemoved => "deviceRemoved",
            Self::GroupAdded => "groupAdded",
            Self::GroupRenamed => "groupRenamed",
            Self::GroupRemoved => "groupRemoved",
            Self::GroupMemberAdded => "groupMemberAdded",
            Self::GroupMemberRemoved => "groupMemberRemoved",
            Self::PublishEntityState => "publishEntityState",
            Self::StateChange => "stateChange",
            Self::PathChange => "pathChange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidEvent(s.to_string()))
    }
}

/// What happened at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The value at the path was replaced. Retained by pub/sub transports.
    Set,
    /// An ephemeral occurrence (button press). Not retained.
    Publish,
    /// The path no longer exists.
    Delete,
}

/// Notification that one path of the namespace changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathChange {
    pub command: ChangeKind,
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PathChange {
    #[must_use]
    pub fn set(path: Path, data: Value) -> Self {
        Self {
            command: ChangeKind::Set,
            path,
            data: Some(data),
        }
    }

    #[must_use]
    pub fn publish(path: Path, data: Value) -> Self {
        Self {
            command: ChangeKind::Publish,
            path,
            data: Some(data),
        }
    }

    #[must_use]
    pub fn delete(path: Path) -> Self {
        Self {
            command: ChangeKind::Delete,
            path,
            data: None,
        }
    }

    /// Pub/sub retention: everything except ephemeral publishes.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        self.command != ChangeKind::Publish
    }
}

/// A domain event with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    DeviceAdded {
        device: DeviceId,
    },
    DeviceRenamed {
        device: DeviceId,
        from: String,
        to: String,
    },
    DeviceRemoved {
        device: DeviceId,
        friendly_name: String,
        mode: RemoveMode,
    },
    GroupAdded {
        group: GroupId,
        friendly_name: String,
    },
    GroupRenamed {
        group: GroupId,
        from: String,
        to: String,
    },
    GroupRemoved {
        group: GroupId,
        friendly_name: String,
    },
    GroupMemberAdded {
        group: GroupId,
        device: DeviceId,
        endpoint: u8,
    },
    GroupMemberRemoved {
        group: GroupId,
        device: DeviceId,
        endpoint: u8,
    },
    /// About to publish `payload` for `entity` (merged state plus transients).
    PublishEntityState {
        entity: EntityRef,
        payload: StateMap,
    },
    /// Cached state of `entity` changed from `from` to `to`.
    StateChange {
        entity: EntityRef,
        from: StateMap,
        to: StateMap,
    },
    PathChange(PathChange),
}

impl BusEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceAdded { .. } => EventKind::DeviceAdded,
            Self::DeviceRenamed { .. } => EventKind::DeviceRenamed,
            Self::DeviceRemoved { .. } => EventKind::DeviceRemoved,
            Self::GroupAdded { .. } => EventKind::GroupAdded,
            Self::GroupRenamed { .. } => EventKind::GroupRenamed,
            Self::GroupRemoved { .. } => EventKind::GroupRemoved,
            Self::GroupMemberAdded { .. } => EventKind::GroupMemberAdded,
            Self::GroupMemberRemoved { .. } => EventKind::GroupMemberRemoved,
            Self::PublishEntityState { .. } => EventKind::PublishEntityState,
            Self::StateChange { .. } => EventKind::StateChange,
            Self::PathChange(_) => EventKind::PathChange,
        }
    }
}

impl From<PathChange> for BusEvent {
    fn from(change: PathChange) -> Self {
        Self::PathChange(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_roundtrip_every_kind_through_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
    }

    #[test]
    fn should_reject_kind_outside_vocabulary() {
        assert_eq!(
            "stateChanged".parse::<EventKind>(),
            Err(ValidationError::InvalidEvent("stateChanged".to_string()))
        );
    }

    #[test]
    fn should_map_payload_to_kind() {
        let event = BusEvent::DeviceAdded {
            device: DeviceId::new("0x01"),
        };
        assert_eq!(event.kind(), EventKind::DeviceAdded);
        let change: BusEvent = PathChange::delete(Path::parse("devices/0x01")).into();
        assert_eq!(change.kind(), EventKind::PathChange);
    }

    #[test]
    fn should_serialize_delete_without_data() {
        let change = PathChange::delete(Path::parse("devices/0x01"));
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"command": "delete", "path": ["devices", "0x01"]})
        );
    }

    #[test]
    fn should_not_retain_ephemeral_publishes() {
        let path = Path::parse("devices/0x01/event");
        assert!(!PathChange::publish(path.clone(), json!({})).is_retained());
        assert!(PathChange::set(path, json!({})).is_retained());
    }
}
