//! Endpoint-name vocabulary and attribute-key suffix parsing.
//!
//! A multi-endpoint device (e.g. a two-gang switch) addresses each endpoint
//! by name. Attribute keys may carry that name as a suffix, `state_left`
//! meaning "the `state` attribute on endpoint `left`".

/// Endpoint names recognised as attribute-key suffixes.
pub const ENDPOINT_NAMES: &[&str] = &[
    "left", "right", "center", "top", "bottom", "white", "rgb", "cool", "warm", "system",
    "default", "usb", "heat", "l1", "l2", "l3", "l4", "l5", "l6", "l7", "l8", "ep1", "ep2",
    "ep3", "ep4", "ep5", "ep6", "ep7", "ep8",
];

/// Keys renamed with the endpoint suffix when a converter reports state back
/// for an endpoint-targeted attribute.
pub const ENDPOINT_SCOPED_KEYS: &[&str] = &["state", "brightness", "color", "color_temp"];

/// Whether `name` is part of the recognised endpoint vocabulary.
#[must_use]
pub fn is_endpoint_name(name: &str) -> bool {
    ENDPOINT_NAMES.contains(&name)
}

/// Split `key` into `(base, endpoint)` when its last `_`-separated segment
/// is a recognised endpoint name.
///
/// ```
/// use meshbridge_domain::endpoint::split_endpoint_suffix;
///
/// assert_eq!(split_endpoint_suffix("state_left"), Some(("state", "left")));
/// assert_eq!(split_endpoint_suffix("color_temp"), None);
/// ```
#[must_use]
pub fn split_endpoint_suffix(key: &str) -> Option<(&str, &str)> {
    let (base, suffix) = key.rsplit_once('_')?;
    if base.is_empty() || !is_endpoint_name(suffix) {
        return None;
    }
    Some((base, suffix))
}

/// Append `_<endpoint>` to `key`.
#[must_use]
pub fn with_endpoint_suffix(key: &str, endpoint: &str) -> String {
    format!("{key}_{endpoint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_split_known_endpoint_suffix() {
        assert_eq!(split_endpoint_suffix("state_right"), Some(("state", "right")));
        assert_eq!(
            split_endpoint_suffix("brightness_l2"),
            Some(("brightness", "l2"))
        );
    }

    #[test]
    fn should_not_split_unknown_suffix() {
        assert_eq!(split_endpoint_suffix("state_unknown"), None);
        assert_eq!(split_endpoint_suffix("color_temp"), None);
        assert_eq!(split_endpoint_suffix("brightness_percent"), None);
    }

    #[test]
    fn should_not_split_key_without_underscore() {
        assert_eq!(split_endpoint_suffix("state"), None);
    }

    #[test]
    fn should_split_on_last_underscore_only() {
        assert_eq!(
            split_endpoint_suffix("color_temp_left"),
            Some(("color_temp", "left"))
        );
    }

    #[test]
    fn should_not_treat_bare_endpoint_name_as_suffix() {
        assert_eq!(split_endpoint_suffix("_left"), None);
    }

    #[test]
    fn should_append_suffix() {
        assert_eq!(with_endpoint_suffix("state", "left"), "state_left");
    }
}
