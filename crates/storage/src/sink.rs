//! Row sinks: where batched events land.
//!
//! The writer only knows the [`RowSink`] seam; production uses [`PgSink`],
//! tests substitute an in-memory sink with failure injection.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use helios_core::Event;

use crate::error::StorageError;

/// Persists a batch of events atomically.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Insert the batch in one transaction. Returns the number of rows
    /// written. An error means nothing from this batch was committed.
    async fn insert_batch(&self, events: &[Event]) -> Result<usize, StorageError>;
}

const INSERT_EVENT: &str = r#"
INSERT INTO events (time, service, level, message, metadata, trace_id, span_id, host, ingested_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

/// PostgreSQL/TimescaleDB sink for the `events` hypertable.
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowSink for PgSink {
    async fn insert_batch(&self, events: &[Event]) -> Result<usize, StorageError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for event in events {
            let time = event
                .timestamp
                .or(event.ingested_at)
                .unwrap_or_else(Utc::now);
            let metadata = event
                .metadata
                .as_ref()
                .map(|m| serde_json::Value::Object(m.clone()));

            sqlx::query(INSERT_EVENT)
                .bind(time)
                .bind(&event.service)
                .bind(event.level.as_str())
                .bind(&event.message)
                .bind(metadata)
                .bind(&event.trace_id)
                .bind(&event.span_id)
                .bind(&event.host)
                .bind(event.ingested_at.unwrap_or_else(Utc::now))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(rows = events.len(), "batch committed");
        Ok(events.len())
    }
}
