//! Liveness and readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// `GET /health` — liveness. 200 unconditionally once the server is up.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "ingestion"}))
}

/// `GET /ready` — readiness. 200 iff the event log is reachable.
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    match state.producer.health().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))).into_response(),
        Err(e) => {
            warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not ready"})),
            )
                .into_response()
        }
    }
}
