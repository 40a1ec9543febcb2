//! Uniform request/response envelope shared by every transport.
//!
//! Inbound: `{command: get|set|create|delete, path: string|array, data?}`.
//! Outbound: `{command: "response", status: successful|failed, data?|error?}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::path::Path;

/// Operation requested on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Get,
    Set,
    Create,
    Delete,
}

impl Command {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ValidationError;

    /// Case-insensitive: `GET` and `get` are the same command.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            _ => Err(ValidationError::UnknownCommand(s.to_string())),
        }
    }
}

/// A validated inbound request. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub path: Path,
    pub data: Map<String, Value>,
}

impl Request {
    #[must_use]
    pub fn new(command: Command, path: Path, data: Map<String, Value>) -> Self {
        Self {
            command,
            path,
            data,
        }
    }

    /// Validate a raw JSON request object.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::CommandNotString`] when `command` is missing or not a string
    /// - [`ValidationError::UnknownCommand`] when it is not one of the four verbs
    /// - [`ValidationError::PathNotStringOrArray`] when `path` has the wrong type
    /// - [`ValidationError::DataNotObject`] when `data` is present but not an object
    pub fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        let command = raw
            .get("command")
            .and_then(Value::as_str)
            .ok_or(ValidationError::CommandNotString)?
            .parse()?;
        let path = match raw.get("path") {
            Some(value) => Path::from_json(value)?,
            None => return Err(ValidationError::PathNotStringOrArray),
        };
        let data = data_map(raw.get("data"))?;
        Ok(Self::new(command, path, data))
    }
}

/// Normalise an optional `data` value into an owned map.
///
/// # Errors
///
/// Returns [`ValidationError::DataNotObject`] when `data` is neither absent,
/// `null`, nor an object.
pub fn data_map(data: Option<&Value>) -> Result<Map<String, Value>, ValidationError> {
    match data {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(ValidationError::DataNotObject),
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Successful,
    Failed,
}

/// Result envelope. On failure `error` is set and `data` is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    #[must_use]
    pub fn success(data: Option<Value>) -> Self {
        Self {
            status: Status::Successful,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            data: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Successful
    }

    /// Render as the session-transport envelope: `command: "response"` plus
    /// the client's correlation id when one was supplied.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&Value>) -> Value {
        let mut envelope = Map::new();
        envelope.insert("command".to_string(), Value::from("response"));
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            envelope.extend(fields);
        }
        if let Some(id) = request_id {
            envelope.insert("requestId".to_string(), id.clone());
        }
        Value::Object(envelope)
    }
}
