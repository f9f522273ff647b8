use crate::api::handlers::{self, AppState};
use crate::api::ws;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Assemble the HTTP surface: login and the generic entity routes under
/// the configured base path, the websocket endpoint, and a health probe.
pub fn create_router(state: AppState, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');

    Router::new()
        .route(&format!("{base}/login"), post(handlers::login))
        .route(&format!("{base}/*path"), any(handlers::serve_entity))
        .route("/websocket", get(ws::ws_handler))
        .route("/health", get(handlers::health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
