//! Event acceptance: decode → validate → enrich → encode → produce.
//!
//! The contract: by the time a 202 leaves this handler, the event has been
//! durably acknowledged by the log. Validation failures are 400 and never
//! 5xx; a failed produce is 503 and the event does not count as accepted.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use helios_core::{codec, Event, EventError};
use helios_rohrpost::Record;

use crate::state::AppState;

use super::{respond_error, BatchResponse, EventResponse};

/// Batch size bounds, inclusive.
const BATCH_MIN: usize = 1;
const BATCH_MAX: usize = 1000;

/// `POST /api/v1/events` — accept a single event.
pub async fn ingest_event(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let start = Instant::now();
    let response = ingest_event_inner(&state, &body).await;
    state
        .metrics
        .ingestion_latency
        .with_label_values(&["ingest_event"])
        .observe(start.elapsed().as_secs_f64());
    response
}

async fn ingest_event_inner(state: &AppState, body: &[u8]) -> Response {
    let mut event = match codec::parse(body) {
        Ok(event) => event,
        Err(e) => {
            state
                .metrics
                .events_ingested
                .with_label_values(&["unknown", "unknown", "validation_error"])
                .inc();
            let error = match e {
                EventError::Json(_) => "Invalid JSON",
                _ => "Validation failed",
            };
            return respond_error(StatusCode::BAD_REQUEST, error, e.to_string());
        }
    };

    codec::enrich(&mut event, &state.hostname, Utc::now());

    let record = match encode_record(state, &event) {
        Ok(record) => record,
        Err(e) => {
            error!(service = %event.service, error = %e, "failed to serialize event");
            state
                .metrics
                .events_ingested
                .with_label_values(&[&event.service, event.level.as_str(), "serialization_error"])
                .inc();
            return respond_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to serialize event",
                e.to_string(),
            );
        }
    };

    match state.producer.produce(record).await {
        Ok(_) => {
            info!(
                service = %event.service,
                level = %event.level,
                "event ingested"
            );
            state
                .metrics
                .events_ingested
                .with_label_values(&[&event.service, event.level.as_str(), "success"])
                .inc();
            (
                StatusCode::ACCEPTED,
                Json(EventResponse {
                    status: "accepted",
                    timestamp: Utc::now(),
                    message: "Event ingested successfully",
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(service = %event.service, error = %e, "failed to produce event");
            state.metrics.producer_errors.inc();
            state
                .metrics
                .events_ingested
                .with_label_values(&[&event.service, event.level.as_str(), "log_error"])
                .inc();
            respond_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Failed to ingest event",
                "log producer error",
            )
        }
    }
}

#[derive(Deserialize)]
struct BatchEnvelope {
    events: Vec<serde_json::Value>,
}

/// `POST /api/v1/events/batch` — accept 1–1000 events as one produce batch.
///
/// Individual invalid events are skipped and counted; a whole-batch produce
/// failure is a 503 with nothing accepted.
pub async fn ingest_batch(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let start = Instant::now();
    let response = ingest_batch_inner(&state, &body).await;
    state
        .metrics
        .ingestion_latency
        .with_label_values(&["ingest_batch"])
        .observe(start.elapsed().as_secs_f64());
    response
}

async fn ingest_batch_inner(state: &AppState, body: &[u8]) -> Response {
    let envelope: BatchEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => return respond_error(StatusCode::BAD_REQUEST, "Invalid JSON", e.to_string()),
    };

    let total = envelope.events.len();
    if !(BATCH_MIN..=BATCH_MAX).contains(&total) {
        return respond_error(
            StatusCode::BAD_REQUEST,
            "Validation failed",
            format!("batch must contain {BATCH_MIN}-{BATCH_MAX} events (got {total})"),
        );
    }

    let now = Utc::now();
    let mut records = Vec::with_capacity(total);
    let mut accepted: Vec<Event> = Vec::with_capacity(total);
    let mut error_count = 0usize;

    for value in &envelope.events {
        let mut event = match codec::from_value(value) {
            Ok(event) => event,
            Err(_) => {
                error_count += 1;
                state
                    .metrics
                    .events_ingested
                    .with_label_values(&["unknown", "unknown", "validation_error"])
                    .inc();
                continue;
            }
        };

        codec::enrich(&mut event, &state.hostname, now);

        match encode_record(state, &event) {
            Ok(record) => {
                records.push(record);
                accepted.push(event);
            }
            Err(_) => {
                error_count += 1;
                state
                    .metrics
                    .events_ingested
                    .with_label_values(&[&event.service, event.level.as_str(), "serialization_error"])
                    .inc();
            }
        }
    }

    if !records.is_empty() {
        if let Err(e) = state.producer.produce_batch(records).await {
            warn!(batch_size = accepted.len(), error = %e, "failed to produce batch");
            state.metrics.producer_errors.inc();
            return respond_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Failed to ingest batch",
                "log producer error",
            );
        }
    }

    for event in &accepted {
        state
            .metrics
            .events_ingested
            .with_label_values(&[&event.service, event.level.as_str(), "success"])
            .inc();
    }

    info!(
        total,
        success_count = accepted.len(),
        error_count,
        "batch ingested"
    );

    (
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            status: "accepted",
            total,
            success_count: accepted.len(),
            error_count,
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}

/// Encode an enriched event into a log record keyed by service.
fn encode_record(state: &AppState, event: &Event) -> Result<Record, EventError> {
    let payload = codec::encode(event)?;
    Ok(Record::new(
        state.events_topic.clone(),
        codec::partition_key(event).to_vec(),
        payload,
        event.timestamp.unwrap_or_else(Utc::now),
    ))
}
