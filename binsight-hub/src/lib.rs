//! BinSight Hub - event pipeline for waste classification
//!
//! Receives classification payloads from producers (REST or WebSocket),
//! validates and persists them, derives statistics and alerts, and fans
//! events out to grouped WebSocket subscribers.
//!
//! The router is built here rather than in main.rs so integration tests
//! can drive the full HTTP surface without binding a socket.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod db;
pub mod hub;
pub mod ingest;
pub mod overrides;
pub mod pagination;
pub mod state;
pub mod stats;
pub mod upstream;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;

/// Build the full application router, REST surface plus the `/hub`
/// WebSocket endpoint
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/hub", get(hub::session::hub_endpoint))
        .route(
            "/api/classifications",
            post(handlers::ingest_classification).get(handlers::list_classifications),
        )
        .route(
            "/api/classifications/search",
            get(handlers::search_classifications),
        )
        .route(
            "/api/classifications/:id",
            get(handlers::get_classification).delete(handlers::delete_classification),
        )
        .route(
            "/api/classifications/:id/image",
            get(handlers::get_classification_image),
        )
        .route(
            "/api/classifications/:id/override",
            post(handlers::override_classification),
        )
        .route("/api/statistics", get(handlers::get_statistics))
        .route("/api/alerts", get(handlers::list_alerts))
        .route("/api/alerts/:id/resolve", post(handlers::resolve_alert))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
