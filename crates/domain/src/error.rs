//! Common error types used across the workspace.
//!
//! Every layer converts into [`BridgeError`] via `#[from]`. The `Display`
//! output of each variant is what ends up in the `error` field of a failed
//! response envelope, so messages are short, lowercase and self-contained.

use crate::event::EventKind;

/// Base error for the whole workspace.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed path, command or data.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Unresolved path, entity or command.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Entity without capability descriptors.
    #[error(transparent)]
    Unsupported(#[from] UnsupportedError),

    /// A single attribute failed to convert.
    #[error(transparent)]
    Converter(#[from] ConverterError),

    /// The control network refused a lifecycle operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Anything else, including event bus misuse.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl BridgeError {
    /// Wrap a foreign error as [`InternalError::Other`].
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(InternalError::Other(Box::new(err)))
    }
}

/// Domain invariant and request-shape violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("command is not a string")]
    CommandNotString,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("path is not a string nor an array")]
    PathNotStringOrArray,

    #[error("path segments must be strings")]
    PathSegmentNotString,

    #[error("data is not an object")]
    DataNotObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("no such property: {0}")]
    UnknownProperty(String),

    #[error("invalid remove mode '{0}', expected remove, force_remove or ban")]
    InvalidRemoveMode(String),

    #[error("event '{0}' not supported")]
    InvalidEvent(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("friendly name '{0}' is already in use")]
    NameTaken(String),

    #[error("group id {0} is already in use")]
    GroupIdTaken(u16),

    #[error("scene '{scene}' references '{device}' which is not a member of the group")]
    SceneMember { scene: String, device: String },

    #[error("could not set log level to '{0}', allowed levels: error, warn, info, debug")]
    InvalidLogLevel(String),
}

/// A path, entity or command could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("no such command: {0}")]
    Command(String),

    #[error("device '{0}' does not exist")]
    Device(String),

    #[error("group '{0}' does not exist")]
    Group(String),

    #[error("scene '{0}' does not exist")]
    Scene(String),

    #[error("device '{device}' has no endpoint '{endpoint}'")]
    Endpoint { device: String, endpoint: String },
}

/// The entity exists but exposes no capability descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedError {
    #[error("device with model id '{0}' is not supported")]
    Device(String),
}

/// A single attribute could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConverterError {
    #[error("no converter available for '{0}'")]
    NoConverter(String),

    #[error("no converter available for '{operation}' '{key}'")]
    NoOperation { operation: String, key: String },

    #[error("{0}")]
    Failed(String),
}

/// The control network refused a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("device remove ({mode}) failed: {reason}")]
    Remove { mode: String, reason: String },

    #[error("network operation failed: {0}")]
    Network(String),
}

/// Errors that indicate a bug or an unexpected foreign failure.
#[derive(Debug, thiserror::Error)]
pub enum InternalError {
    #[error("event '{0}' emitted from within its own handler")]
    Reentrant(EventKind),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
