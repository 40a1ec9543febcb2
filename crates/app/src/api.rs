//! Envelope router: `{command, path, data}` in, one response envelope out.
//!
//! The first path segment selects the namespace delegate; the remaining
//! segments are forwarded verbatim. This is the call form every session and
//! HTTP transport uses.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Value, json};

use meshbridge_domain::envelope::{Command, Request, Response};
use meshbridge_domain::error::{BridgeError, NotFoundError};
use meshbridge_domain::tree::StateTree;

use crate::services::{DevicesApi, GroupsApi};

/// Delegates registered under the first path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Devices,
    Groups,
}

impl Namespace {
    pub const ALL: [Self; 2] = [Self::Devices, Self::Groups];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Devices => "devices",
            Self::Groups => "groups",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == s).ok_or(())
    }
}

pub struct Api {
    devices: Arc<DevicesApi>,
    groups: Arc<GroupsApi>,
}

impl Api {
    pub fn new(devices: Arc<DevicesApi>, groups: Arc<GroupsApi>) -> Self {
        Self { devices, groups }
    }

    /// Snapshot of the whole namespace: `{devices: {...}, groups: {...}}`.
    ///
    /// Read only: devices the bridge has not adopted yet are listed with
    /// their default settings, which are not persisted.
    #[must_use]
    pub fn tree(&self) -> StateTree {
        let mut tree = StateTree::new();
        tree.insert(Namespace::Devices.as_str(), self.devices.tree());
        tree.insert(Namespace::Groups.as_str(), self.groups.tree());
        tree
    }

    /// Route `request` to its delegate and return the raw result.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Command`] when no delegate owns the path, and
    /// whatever the delegate returns otherwise.
    pub async fn execute(&self, request: &Request) -> Result<Option<Value>, BridgeError> {
        let not_found = || NotFoundError::Command(request.path.to_string());
        let Some(first) = request.path.first() else {
            return match request.command {
                Command::Get => Ok(Some(self.tree().to_value())),
                _ => Err(not_found().into()),
            };
        };
        let namespace: Namespace = first.parse().map_err(|()| not_found())?;
        let rest = request.path.tail();
        let data = request.data.clone();
        match namespace {
            Namespace::Devices => self.devices.call(request.command, &rest, data).await,
            Namespace::Groups => self.groups.call(request.command, &rest, data).await,
        }
    }

    /// Execute `request` and normalise the outcome into a [`Response`].
    ///
    /// A null result becomes `{}`; errors become a failure carrying the
    /// error message.
    pub async fn call(&self, request: Request) -> Response {
        match self.execute(&request).await {
            Ok(data) => Response::success(Some(data.unwrap_or_else(|| json!({})))),
            Err(error) => {
                tracing::error!(
                    command = %request.command,
                    path = %request.path,
                    data = %serde_json::Value::Object(request.data.clone()),
                    %error,
                    "command failed"
                );
                Response::failure(error.to_string())
            }
        }
    }

    /// Validate a raw JSON request, then [`call`](Self::call) it.
    pub async fn call_json(&self, raw: &Value) -> Response {
        match Request::from_json(raw) {
            Ok(request) => self.call(request).await,
            Err(error) => {
                tracing::error!(request = %raw, %error, "invalid request");
                Response::failure(error.to_string())
            }
        }
    }
}
