//! Log level port: runtime control of the process-wide log filter.

use meshbridge_domain::error::{BridgeError, ValidationError};

/// Levels that may be selected at runtime.
pub const ALLOWED_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug"];

/// Switches the active log level. Implemented by the binary on top of its
/// subscriber's reload handle.
pub trait LogLevelControl: Send + Sync {
    /// Currently active level.
    fn level(&self) -> String;

    /// Apply an already validated level.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscriber refuses the new filter.
    fn apply(&self, level: &str) -> Result<(), BridgeError>;

    /// Validate `level` (case-insensitive) and apply it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidLogLevel`] for levels outside
    /// [`ALLOWED_LOG_LEVELS`].
    fn set_level(&self, level: &str) -> Result<(), BridgeError> {
        let level = level.to_ascii_lowercase();
        if !ALLOWED_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ValidationError::InvalidLogLevel(level).into());
        }
        self.apply(&level)
    }
}

/// A control that remembers the level without touching any subscriber.
#[derive(Debug)]
pub struct FixedLogLevel(std::sync::RwLock<String>);

impl FixedLogLevel {
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self(std::sync::RwLock::new(level.into()))
    }
}

impl LogLevelControl for FixedLogLevel {
    fn level(&self) -> String {
        self.0.read().map(|l| l.clone()).unwrap_or_default()
    }

    fn apply(&self, level: &str) -> Result<(), BridgeError> {
        if let Ok(mut current) = self.0.write() {
            *current = level.to_string();
        }
        Ok(())
    }
}
