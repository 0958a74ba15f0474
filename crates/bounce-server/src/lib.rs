//! Local relay server: accepts arbitrary HTTP requests and bounces each one
//! over a persistent WebSocket channel to a remote executor, streaming the
//! executor's response back to the original client.

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, middleware, routing};

pub mod assets;
pub mod config;
pub mod cors;
pub mod error;
pub mod forward;
pub mod health;
pub mod queue;
pub mod registry;
pub mod state;
pub mod sync;
pub mod tls;
pub mod util;
pub mod websocket;

use state::AppState;

/// The HTTP surface: sync API and health first, everything else through the
/// forwarder/static fallback, permissive CORS over the lot.
pub fn http_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", routing::get(health::health_handler))
        .route("/api/sync/metadata", routing::get(sync::metadata_handler))
        .route("/api/sync/pull", routing::get(sync::pull_handler))
        .route("/api/sync/pull-all", routing::get(sync::pull_all_handler))
        .route("/api/sync/push", routing::post(sync::push_handler))
        .route("/api/sync/delete", routing::delete(sync::delete_handler))
        .fallback(forward::fallback_handler)
        .layer(middleware::from_fn(cors::reflect))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}

/// The executor-facing WebSocket listener; any path upgrades.
pub fn ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(websocket::connect_handler)
        .with_state(state)
}
