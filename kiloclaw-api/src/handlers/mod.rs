use axum::{
    routing::{get, post},
    Router,
};

use crate::middleware;
use crate::state::AppState;

mod health;
mod pairing;
mod platform;

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
}

/// The platform RPC surface (spec §4.4/§6), gated by the shared internal key.
pub fn platform_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/provision", post(platform::provision))
        .route("/start", post(platform::start))
        .route("/stop", post(platform::stop))
        .route("/destroy", post(platform::destroy))
        .route("/status", get(platform::status))
        .route("/pairing/list", post(pairing::list))
        .route("/pairing/approve", post(pairing::approve))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_internal_key,
        ))
}
