//! Subscriber setup, with the filter behind a reload handle so the log level
//! can be switched at runtime.

use std::sync::{PoisonError, RwLock};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use meshbridge_app::ports::LogLevelControl;
use meshbridge_domain::error::BridgeError;

/// Level reported before anyone switches it.
const INITIAL_LEVEL: &str = "info";

/// [`LogLevelControl`] backed by the subscriber's reload handle.
///
/// A switched level replaces the whole filter directive: `debug` means
/// debug for every target.
pub struct ReloadLogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
    level: RwLock<String>,
}

impl LogLevelControl for ReloadLogLevel {
    fn level(&self) -> String {
        self.level
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn apply(&self, level: &str) -> Result<(), BridgeError> {
        self.handle
            .reload(EnvFilter::new(level))
            .map_err(BridgeError::internal)?;
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = level.to_string();
        Ok(())
    }
}

/// Install the global subscriber with `filter` and return its level control.
pub fn init(filter: &str) -> ReloadLogLevel {
    let (layer, handle) = reload::Layer::new(EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
    ReloadLogLevel {
        handle,
        level: RwLock::new(INITIAL_LEVEL.to_string()),
    }
}
