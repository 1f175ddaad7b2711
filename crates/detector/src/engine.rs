//! The detection engine: fold events, close buckets, score, classify,
//! deduplicate.
//!
//! The engine is single-writer: one task owns it and feeds it events and
//! ticks, so per-service state needs no locking. Scoring is at-most-once
//! per bucket because closed buckets leave the window store before they are
//! scored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use helios_core::config::DetectorConfig;
use helios_core::{AnomalyRecord, Event, Severity};

use crate::dedup::AlertDeduper;
use crate::features;
use crate::metrics::DetectorMetrics;
use crate::model::ModelArtifact;
use crate::window::{ClosedBucket, WindowStore};

pub struct DetectionEngine {
    store: WindowStore,
    deduper: AlertDeduper,
    model: Arc<ModelArtifact>,
    threshold: f64,
    min_events: usize,
    metrics: DetectorMetrics,
}

impl DetectionEngine {
    pub fn new(model: Arc<ModelArtifact>, config: &DetectorConfig, metrics: DetectorMetrics) -> Self {
        Self {
            store: WindowStore::new(
                config.window_size_minutes,
                config.max_skew_secs,
                config.max_buckets_per_service,
            ),
            deduper: AlertDeduper::new(config.dedup_cooldown_secs),
            model,
            threshold: config.anomaly_threshold,
            min_events: config.min_events_per_window,
            metrics,
        }
    }

    /// Fold one event; score whatever buckets it closes.
    pub fn process_event(&mut self, event: &Event, now: DateTime<Utc>) -> Vec<AnomalyRecord> {
        let outcome = self.store.fold(event);
        if outcome.evicted > 0 {
            debug!(
                service = %event.service,
                evicted = outcome.evicted,
                "bucket cap evicted unscored windows"
            );
        }
        self.score_closed(outcome.closed, now)
    }

    /// Periodic tick: score buckets whose end has aged past the skew grace.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<AnomalyRecord> {
        let closed = self.store.close_due(now);
        self.score_closed(closed, now)
    }

    /// Open buckets currently held (observability).
    pub fn open_buckets(&self) -> usize {
        self.store.open_buckets()
    }

    fn score_closed(&mut self, closed: Vec<ClosedBucket>, now: DateTime<Utc>) -> Vec<AnomalyRecord> {
        let mut records = Vec::new();

        for bucket in closed {
            if bucket.acc.event_count < self.min_events {
                self.metrics.windows_skipped.inc();
                debug!(
                    service = %bucket.service,
                    bucket = %bucket.start,
                    events = bucket.acc.event_count,
                    min = self.min_events,
                    "window below event minimum"
                );
                continue;
            }

            let features = features::extract(&bucket.acc);
            let score = match self.model.score(&features) {
                Ok(score) => score,
                Err(e) => {
                    warn!(
                        service = %bucket.service,
                        bucket = %bucket.start,
                        error = %e,
                        "model inference failed, skipping bucket"
                    );
                    self.metrics.model_errors.inc();
                    continue;
                }
            };
            self.metrics.windows_scored.inc();

            let Some(severity) = Severity::classify(score, features.error_rate, self.threshold)
            else {
                debug!(service = %bucket.service, score, "window within normal range");
                continue;
            };

            if !self.deduper.permit(&bucket.service, now) {
                self.metrics.alerts_suppressed.inc();
                debug!(service = %bucket.service, "alert suppressed by cooldown");
                continue;
            }

            info!(
                service = %bucket.service,
                severity = %severity,
                score,
                error_rate = features.error_rate,
                events = bucket.acc.event_count,
                "anomaly detected"
            );
            self.metrics
                .anomalies_detected
                .with_label_values(&[&bucket.service, severity.as_str()])
                .inc();

            records.push(AnomalyRecord {
                anomaly_id: Uuid::new_v4(),
                time: bucket.end,
                service: bucket.service,
                score,
                threshold: self.threshold,
                severity,
                features,
                confidence: None,
                is_resolved: false,
            });
        }

        records
    }
}
