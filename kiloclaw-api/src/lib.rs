pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Build the application router: unauthenticated health endpoints at the
/// root, the platform RPC surface under `/api/platform` gated by the shared
/// internal key (spec §6).
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health_routes())
        .nest("/api/platform", handlers::platform_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
