//! HTTP router construction.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::api;
use crate::state::AppState;

/// Outer request deadline, covering body read and the log produce.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 10 MiB is generous for a 1000-event batch.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/events", post(api::ingest_event))
        .route("/api/v1/events/batch", post(api::ingest_batch))
        .route("/health", get(api::health))
        .route("/ready", get(api::ready))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
