//! HTTP handlers and response envelopes for the ingestion surface.

pub mod events;
pub mod health;

pub use events::{ingest_batch, ingest_event};
pub use health::{health, ready};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Body of a 202 response for the single-event endpoint.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub message: &'static str,
}

/// Body of a 202 response for the batch endpoint.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Body of every error response (400/500/503).
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: &'static str,
    pub details: String,
}

/// Build an error response in the standard envelope.
pub(crate) fn respond_error(
    code: StatusCode,
    error: &'static str,
    details: impl Into<String>,
) -> Response {
    (
        code,
        Json(ErrorResponse {
            status: "error",
            error,
            details: details.into(),
        }),
    )
        .into_response()
}
