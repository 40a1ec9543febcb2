//! Path: slash-delimited address of a sub-resource in the uniform namespace.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Ordered path segments, e.g. `["devices", "0x01", "state"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    /// The empty path (addresses the whole tree).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a `/`-delimited string.
    ///
    /// A single leading empty segment is stripped, and the empty string
    /// yields the empty path.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw == "/" {
            return Self::root();
        }
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        Self(raw.split('/').map(str::to_string).collect())
    }

    /// Build a path from the `path` field of an inbound request, which may be
    /// either a string or an array of strings.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PathNotStringOrArray`] for any other JSON
    /// type, or [`ValidationError::PathSegmentNotString`] when an array
    /// element is not a string.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        match value {
            Value::String(raw) => Ok(Self::parse(raw)),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or(ValidationError::PathSegmentNotString)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            _ => Err(ValidationError::PathNotStringOrArray),
        }
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Everything after the first segment.
    #[must_use]
    pub fn tail(&self) -> Self {
        Self(self.0.iter().skip(1).cloned().collect())
    }

    /// A new path with `segment` appended.
    #[must_use]
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl<S: Into<String>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_split_on_slashes() {
        let path = Path::parse("devices/0x01/state");
        assert_eq!(path.segments(), ["devices", "0x01", "state"]);
    }

    #[test]
    fn should_strip_leading_empty_segment() {
        let path = Path::parse("/groups/1");
        assert_eq!(path.segments(), ["groups", "1"]);
    }

    #[test]
    fn should_yield_empty_path_for_empty_string() {
        assert!(Path::parse("").is_empty());
        assert!(Path::parse("/").is_empty());
    }

    #[test]
    fn should_accept_array_of_strings() {
        let path = Path::from_json(&json!(["devices", "0x01"])).unwrap();
        assert_eq!(path.to_string(), "devices/0x01");
    }

    #[test]
    fn should_reject_non_string_non_array() {
        assert_eq!(
            Path::from_json(&json!(42)),
            Err(ValidationError::PathNotStringOrArray)
        );
    }

    #[test]
    fn should_reject_array_with_non_string_segment() {
        assert_eq!(
            Path::from_json(&json!(["devices", 1])),
            Err(ValidationError::PathSegmentNotString)
        );
    }

    #[test]
    fn should_drop_first_segment_for_tail() {
        let path: Path = ["devices", "0x01", "state"].into_iter().collect();
        assert_eq!(path.tail().segments(), ["0x01", "state"]);
        assert_eq!(path.first(), Some("devices"));
    }

    #[test]
    fn should_serialize_as_array() {
        let path = Path::parse("groups/4");
        assert_eq!(serde_json::to_value(&path).unwrap(), json!(["groups", "4"]));
    }
}
