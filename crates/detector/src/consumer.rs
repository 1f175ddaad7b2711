//! The detector worker loop: consume the event log, drive the engine, and
//! republish anomaly records to the alerts topic.
//!
//! The engine is owned by this single task (single-writer discipline), so
//! no per-service locking is needed. The detector cannot back-pressure its
//! input; if scoring falls behind, consumer lag grows and the exported
//! metrics make that visible.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use helios_core::codec;
use helios_core::config::DetectorConfig;
use helios_core::AnomalyRecord;
use helios_rohrpost::{LogConsumer, LogProducer, Record};

use crate::engine::DetectionEngine;
use crate::error::DetectorError;
use crate::metrics::DetectorMetrics;
use crate::model::ModelArtifact;

/// Bounded publish retries; alerting is best-effort beyond this.
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct Detector {
    consumer: Arc<dyn LogConsumer>,
    producer: Arc<dyn LogProducer>,
    engine: DetectionEngine,
    anomalies_topic: String,
    tick_interval: Duration,
    /// When present, anomalies are also persisted to the store.
    pool: Option<PgPool>,
    metrics: DetectorMetrics,
}

impl Detector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: Arc<dyn LogConsumer>,
        producer: Arc<dyn LogProducer>,
        model: Arc<ModelArtifact>,
        config: &DetectorConfig,
        anomalies_topic: impl Into<String>,
        pool: Option<PgPool>,
        metrics: DetectorMetrics,
    ) -> Self {
        Self {
            consumer,
            producer,
            engine: DetectionEngine::new(model, config, metrics.clone()),
            anomalies_topic: anomalies_topic.into(),
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            pool,
            metrics,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DetectorError> {
        info!(
            topic = %self.anomalies_topic,
            tick_secs = self.tick_interval.as_secs(),
            persist = self.pool.is_some(),
            "detector started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.consumer.next() => {
                    match result {
                        Ok(record) => {
                            self.handle_record(&record.payload).await;
                            if let Err(e) = self.consumer.commit(&[record.commit_offset()]).await {
                                warn!(error = %e, "offset commit failed");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "fetch error, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let anomalies = self.engine.tick(Utc::now());
                    if !anomalies.is_empty() {
                        debug!(count = anomalies.len(), "tick closed scorable windows");
                    }
                    self.emit_all(anomalies).await;
                }
            }
        }

        // Windows are transient state: whatever is open here gets rebuilt
        // from redelivered events after restart.
        info!(open_buckets = self.engine.open_buckets(), "detector stopped");
        Ok(())
    }

    async fn handle_record(&mut self, payload: &[u8]) {
        let start = Instant::now();
        match codec::parse(payload) {
            Ok(event) => {
                let anomalies = self.engine.process_event(&event, Utc::now());
                self.metrics
                    .events_processed
                    .with_label_values(&["success"])
                    .inc();
                self.emit_all(anomalies).await;
            }
            Err(e) => {
                warn!(error = %e, "undecodable event payload");
                self.metrics
                    .events_processed
                    .with_label_values(&["error"])
                    .inc();
            }
        }
        self.metrics
            .detection_latency
            .observe(start.elapsed().as_secs_f64());
    }

    async fn emit_all(&self, anomalies: Vec<AnomalyRecord>) {
        for anomaly in anomalies {
            self.persist(&anomaly).await;
            self.publish(&anomaly).await;
        }
    }

    /// Publish one anomaly record, keyed by service, with bounded retries.
    /// Losing an alert beats stalling the stream, so the final failure is
    /// logged and counted rather than propagated.
    async fn publish(&self, anomaly: &AnomalyRecord) {
        let payload = match anomaly.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(anomaly_id = %anomaly.anomaly_id, error = %e, "failed to serialize anomaly");
                self.metrics.publish_failures.inc();
                return;
            }
        };

        let record = Record::new(
            self.anomalies_topic.clone(),
            anomaly.service.as_bytes().to_vec(),
            payload,
            anomaly.time,
        );

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.producer.produce(record.clone()).await {
                Ok(_) => {
                    info!(
                        anomaly_id = %anomaly.anomaly_id,
                        service = %anomaly.service,
                        severity = %anomaly.severity,
                        "anomaly published"
                    );
                    return;
                }
                Err(e) if attempt < PUBLISH_ATTEMPTS && e.is_transient() => {
                    warn!(
                        anomaly_id = %anomaly.anomaly_id,
                        attempt,
                        error = %e,
                        "anomaly publish failed, retrying"
                    );
                    tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(
                        anomaly_id = %anomaly.anomaly_id,
                        error = %e,
                        "dropping anomaly after failed publishes"
                    );
                    self.metrics.publish_failures.inc();
                    return;
                }
            }
        }
    }

    /// Best-effort persistence into the `anomalies` table.
    async fn persist(&self, anomaly: &AnomalyRecord) {
        let Some(pool) = &self.pool else {
            return;
        };

        let features = match serde_json::to_value(&anomaly.features) {
            Ok(value) => value,
            Err(e) => {
                warn!(anomaly_id = %anomaly.anomaly_id, error = %e, "failed to encode features");
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO anomalies
                (anomaly_id, time, service, severity, score, threshold, features, confidence, is_resolved)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(anomaly.anomaly_id)
        .bind(anomaly.time)
        .bind(&anomaly.service)
        .bind(anomaly.severity.as_str())
        .bind(anomaly.score)
        .bind(anomaly.threshold)
        .bind(features)
        .bind(anomaly.confidence)
        .bind(anomaly.is_resolved)
        .execute(pool)
        .await;

        if let Err(e) = result {
            warn!(anomaly_id = %anomaly.anomaly_id, error = %e, "failed to persist anomaly");
        }
    }
}
