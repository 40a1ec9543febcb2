//! Axum router assembly.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// `/health` and `/ws` are fixed routes; every other URL is an envelope
/// call. Includes a [`TraceLayer`] that logs each HTTP request/response at
/// the `DEBUG` level.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(crate::ws::upgrade))
        .fallback(crate::api::envelope)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
