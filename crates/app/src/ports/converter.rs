//! Converter port: per-model translation between attribute keys and the
//! device's native encoding.
//!
//! The registry that knows every device model is external. The core sees it
//! as a lookup from [`DeviceInfo`] to a [`Definition`], whose ordered list of
//! [`CapabilityDescriptor`]s maps attribute keys to [`Converter`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use meshbridge_domain::device::DeviceInfo;
use meshbridge_domain::error::ConverterError;
use meshbridge_domain::id::{DeviceId, EntityRef, GroupId};
use meshbridge_domain::state::StateMap;

/// Direction of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete addressee of one converter invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Endpoint { device: DeviceId, endpoint: u8 },
    Group(GroupId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint { device, endpoint } => write!(f, "{device}/{endpoint}"),
            Self::Group(id) => write!(f, "group {id}"),
        }
    }
}

/// Everything a converter may consult besides the key and value.
#[derive(Clone)]
pub struct ConvertContext {
    pub entity: EntityRef,
    /// Endpoint name the command resolved to, if the device names its endpoints.
    pub endpoint_name: Option<String>,
    pub options: Map<String, Value>,
    /// The full payload of the request, not just this key.
    pub message: StateMap,
    /// Cached entity state when the request started.
    pub state: StateMap,
    /// Definition of the device, or of every supported member for a group.
    pub definitions: Vec<Arc<Definition>>,
}

/// What a successful set produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOutcome {
    /// State to publish optimistically.
    pub state: Option<StateMap>,
    /// Re-read the attribute after this delay.
    pub read_after_write: Option<Duration>,
}

impl SetOutcome {
    #[must_use]
    pub fn with_state(state: StateMap) -> Self {
        Self {
            state: Some(state),
            read_after_write: None,
        }
    }

    #[must_use]
    pub fn read_after(mut self, delay: Duration) -> Self {
        self.read_after_write = Some(delay);
        self
    }
}

/// Set/get translation for one group of attribute keys.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Whether this converter implements `operation`.
    fn supports(&self, operation: Operation) -> bool;

    /// Encode and send `key = value` to `target`.
    async fn convert_set(
        &self,
        target: &Target,
        key: &str,
        value: &Value,
        ctx: &ConvertContext,
    ) -> Result<Option<SetOutcome>, ConverterError> {
        let _ = (target, value, ctx);
        Err(ConverterError::NoOperation {
            operation: Operation::Set.to_string(),
            key: key.to_string(),
        })
    }

    /// Ask `target` to report `key`. The answer arrives as a network report.
    async fn convert_get(
        &self,
        target: &Target,
        key: &str,
        ctx: &ConvertContext,
    ) -> Result<(), ConverterError> {
        let _ = (target, ctx);
        Err(ConverterError::NoOperation {
            operation: Operation::Get.to_string(),
            key: key.to_string(),
        })
    }
}

/// Binds a set of attribute keys to the converter that handles them.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    pub keys: Vec<String>,
    pub converter: Arc<dyn Converter>,
}

impl CapabilityDescriptor {
    pub fn new<I, S>(keys: I, converter: Arc<dyn Converter>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            converter,
        }
    }

    #[must_use]
    pub fn covers(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// First descriptor covering `key`, with its position in `descriptors`.
#[must_use]
pub fn find_descriptor<'a>(
    descriptors: &'a [CapabilityDescriptor],
    key: &str,
) -> Option<(usize, &'a CapabilityDescriptor)> {
    descriptors.iter().enumerate().find(|(_, d)| d.covers(key))
}

/// What the registry knows about one device model.
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub model: String,
    pub vendor: String,
    pub description: String,
    /// Endpoint name → endpoint id. Empty for single-endpoint models.
    pub endpoints: BTreeMap<String, u8>,
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl Definition {
    #[must_use]
    pub fn endpoint_id(&self, name: &str) -> Option<u8> {
        self.endpoints.get(name).copied()
    }

    #[must_use]
    pub fn endpoint_name(&self, id: u8) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|(_, ep)| **ep == id)
            .map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn writable_keys(&self) -> Vec<String> {
        writable_keys(&self.capabilities)
    }

    #[must_use]
    pub fn readable_keys(&self) -> Vec<String> {
        readable_keys(&self.capabilities)
    }
}

/// Keys of every descriptor, in declaration order.
#[must_use]
pub fn writable_keys(descriptors: &[CapabilityDescriptor]) -> Vec<String> {
    descriptors.iter().flat_map(|d| d.keys.iter().cloned()).collect()
}

/// Keys of descriptors that can be read back.
#[must_use]
pub fn readable_keys(descriptors: &[CapabilityDescriptor]) -> Vec<String> {
    descriptors
        .iter()
        .filter(|d| d.converter.supports(Operation::Get))
        .flat_map(|d| d.keys.iter().cloned())
        .collect()
}

/// Lookup of device definitions.
pub trait DefinitionRegistry: Send + Sync {
    /// Definition matching the device's model, or `None` when unsupported.
    fn find_by_device(&self, device: &DeviceInfo) -> Option<Arc<Definition>>;

    /// The fixed converter set applicable to group broadcast commands.
    fn group_capabilities(&self) -> Vec<CapabilityDescriptor>;
}
