//! Prometheus metrics for the detector.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

#[derive(Clone)]
pub struct DetectorMetrics {
    registry: Registry,
    /// `helios_detector_events_processed_total{status}`
    pub events_processed: IntCounterVec,
    /// `helios_windows_scored_total`
    pub windows_scored: IntCounter,
    /// `helios_windows_skipped_total` — closed below the event minimum.
    pub windows_skipped: IntCounter,
    /// `helios_anomalies_detected_total{service,severity}`
    pub anomalies_detected: IntCounterVec,
    /// `helios_alerts_suppressed_total`
    pub alerts_suppressed: IntCounter,
    /// `helios_model_errors_total`
    pub model_errors: IntCounter,
    /// `helios_alert_publish_failures_total`
    pub publish_failures: IntCounter,
    /// `helios_detection_latency_seconds`
    pub detection_latency: Histogram,
}

impl DetectorMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_processed = IntCounterVec::new(
            Opts::new(
                "helios_detector_events_processed_total",
                "Events folded into detection windows",
            ),
            &["status"],
        )
        .unwrap();

        let windows_scored = IntCounter::new(
            "helios_windows_scored_total",
            "Closed windows scored by the model",
        )
        .unwrap();

        let windows_skipped = IntCounter::new(
            "helios_windows_skipped_total",
            "Closed windows below the event minimum",
        )
        .unwrap();

        let anomalies_detected = IntCounterVec::new(
            Opts::new("helios_anomalies_detected_total", "Anomalies emitted"),
            &["service", "severity"],
        )
        .unwrap();

        let alerts_suppressed = IntCounter::new(
            "helios_alerts_suppressed_total",
            "Anomalies suppressed by the dedup cooldown",
        )
        .unwrap();

        let model_errors = IntCounter::new(
            "helios_model_errors_total",
            "Model inference failures (bucket skipped)",
        )
        .unwrap();

        let publish_failures = IntCounter::new(
            "helios_alert_publish_failures_total",
            "Anomaly records lost after exhausting publish retries",
        )
        .unwrap();

        let detection_latency = Histogram::with_opts(HistogramOpts::new(
            "helios_detection_latency_seconds",
            "Per-event detection processing time",
        ))
        .unwrap();

        registry.register(Box::new(events_processed.clone())).unwrap();
        registry.register(Box::new(windows_scored.clone())).unwrap();
        registry.register(Box::new(windows_skipped.clone())).unwrap();
        registry.register(Box::new(anomalies_detected.clone())).unwrap();
        registry.register(Box::new(alerts_suppressed.clone())).unwrap();
        registry.register(Box::new(model_errors.clone())).unwrap();
        registry.register(Box::new(publish_failures.clone())).unwrap();
        registry.register(Box::new(detection_latency.clone())).unwrap();

        Self {
            registry,
            events_processed,
            windows_scored,
            windows_skipped,
            anomalies_detected,
            alerts_suppressed,
            model_errors,
            publish_failures,
            detection_latency,
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
