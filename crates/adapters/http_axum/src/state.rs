//! Shared application state for axum handlers.

use std::sync::Arc;

use meshbridge_app::api::Api;
use meshbridge_app::bridge::Bridge;
use meshbridge_app::event_bus::PathChangeFeed;

/// What every handler needs: the envelope API and the change feed that
/// sessions subscribe to.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<Api>,
    pub feed: PathChangeFeed,
}

impl AppState {
    #[must_use]
    pub fn new(api: Arc<Api>, feed: PathChangeFeed) -> Self {
        Self { api, feed }
    }

    #[must_use]
    pub fn from_bridge(bridge: &Bridge) -> Self {
        Self::new(Arc::clone(&bridge.api), bridge.feed.clone())
    }
}
