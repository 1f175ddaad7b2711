//! Anomaly record types shared between the detector and downstream
//! consumers of the `anomaly-alerts` topic.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Feature names in scoring order. The artifact's scaler and every
/// [`FeatureVector`] follow this order exactly.
pub const FEATURE_NAMES: [&str; 12] = [
    "event_count",
    "error_rate",
    "p50_latency_ms",
    "p95_latency_ms",
    "p99_latency_ms",
    "latency_std",
    "hour_of_day",
    "p95_p50_ratio",
    "p99_p95_ratio",
    "error_count",
    "log_event_count",
    "log_error_rate",
];

/// The 12-dimensional numeric summary of one `(service, bucket)` window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub event_count: f64,
    pub error_rate: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub latency_std: f64,
    pub hour_of_day: f64,
    pub p95_p50_ratio: f64,
    pub p99_p95_ratio: f64,
    pub error_count: f64,
    pub log_event_count: f64,
    pub log_error_rate: f64,
}

impl FeatureVector {
    /// Flatten into scoring order (matches [`FEATURE_NAMES`]).
    pub fn to_array(&self) -> [f64; 12] {
        [
            self.event_count,
            self.error_rate,
            self.p50_latency_ms,
            self.p95_latency_ms,
            self.p99_latency_ms,
            self.latency_std,
            self.hour_of_day,
            self.p95_p50_ratio,
            self.p99_p95_ratio,
            self.error_count,
            self.log_event_count,
            self.log_error_rate,
        ]
    }
}

/// Discrete anomaly severity, derived from `(score, error_rate)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Classify a scored window. Rules are evaluated in order, first match
    /// wins; `None` means no anomaly is emitted.
    ///
    /// | severity | condition |
    /// |----------|-----------|
    /// | CRITICAL | score < −1.0 or error_rate > 0.50 |
    /// | HIGH     | score < −0.85 or error_rate > 0.30 |
    /// | MEDIUM   | score < −0.70 or error_rate > 0.15 |
    /// | LOW      | score < threshold |
    pub fn classify(score: f64, error_rate: f64, threshold: f64) -> Option<Severity> {
        if score < -1.0 || error_rate > 0.50 {
            Some(Severity::Critical)
        } else if score < -0.85 || error_rate > 0.30 {
            Some(Severity::High)
        } else if score < -0.70 || error_rate > 0.15 {
            Some(Severity::Medium)
        } else if score < threshold {
            Some(Severity::Low)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An anomaly detected for one `(service, 5-minute bucket)` window,
/// published to the alerts topic keyed by service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub anomaly_id: Uuid,

    /// Window end instant.
    pub time: DateTime<Utc>,

    pub service: String,

    /// Model score; more negative = more anomalous.
    pub score: f64,

    /// Score cutoff in force when the anomaly was detected.
    pub threshold: f64,

    pub severity: Severity,

    /// The exact feature vector that produced `score`.
    pub features: FeatureVector,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default)]
    pub is_resolved: bool,
}

impl AnomalyRecord {
    /// Serialize as canonical JSON bytes for the alerts topic.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = -0.70;

    #[test]
    fn critical_on_score() {
        assert_eq!(
            Severity::classify(-1.2, 0.0, THRESHOLD),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn critical_on_error_rate_regardless_of_score() {
        assert_eq!(
            Severity::classify(0.3, 0.6, THRESHOLD),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn high_band() {
        assert_eq!(Severity::classify(-0.9, 0.0, THRESHOLD), Some(Severity::High));
        assert_eq!(Severity::classify(0.1, 0.35, THRESHOLD), Some(Severity::High));
    }

    #[test]
    fn medium_band() {
        assert_eq!(
            Severity::classify(-0.71, 0.05, THRESHOLD),
            Some(Severity::Medium)
        );
        assert_eq!(
            Severity::classify(0.1, 0.20, THRESHOLD),
            Some(Severity::Medium)
        );
    }

    #[test]
    fn low_only_below_configured_threshold() {
        // With a threshold looser than the MEDIUM cutoff, scores between the
        // two land in LOW.
        assert_eq!(Severity::classify(-0.65, 0.0, -0.6), Some(Severity::Low));
        // At the default threshold the MEDIUM rule shadows LOW exactly.
        assert_eq!(Severity::classify(-0.69, 0.0, THRESHOLD), None);
    }

    #[test]
    fn no_anomaly_for_benign_window() {
        assert_eq!(Severity::classify(0.2, 0.01, THRESHOLD), None);
    }

    #[test]
    fn boundaries_are_strict() {
        // Exactly at a boundary never matches that band.
        assert_eq!(Severity::classify(-1.0, 0.0, THRESHOLD), Some(Severity::High));
        assert_eq!(Severity::classify(-0.85, 0.0, THRESHOLD), Some(Severity::Medium));
        assert_eq!(Severity::classify(-0.70, 0.0, THRESHOLD), None);
        assert_eq!(Severity::classify(0.0, 0.50, THRESHOLD), None);
        assert_eq!(Severity::classify(0.0, 0.15, THRESHOLD), None);
    }

    #[test]
    fn feature_array_matches_names() {
        let features = FeatureVector {
            event_count: 1.0,
            error_rate: 2.0,
            p50_latency_ms: 3.0,
            p95_latency_ms: 4.0,
            p99_latency_ms: 5.0,
            latency_std: 6.0,
            hour_of_day: 7.0,
            p95_p50_ratio: 8.0,
            p99_p95_ratio: 9.0,
            error_count: 10.0,
            log_event_count: 11.0,
            log_error_rate: 12.0,
        };
        let array = features.to_array();
        assert_eq!(array.len(), FEATURE_NAMES.len());
        assert_eq!(array[0], 1.0);
        assert_eq!(array[11], 12.0);
    }

    #[test]
    fn record_roundtrip() {
        let record = AnomalyRecord {
            anomaly_id: Uuid::new_v4(),
            time: Utc::now(),
            service: "payments".into(),
            score: -0.92,
            threshold: THRESHOLD,
            severity: Severity::High,
            features: FeatureVector {
                event_count: 100.0,
                error_rate: 0.35,
                p50_latency_ms: 120.0,
                p95_latency_ms: 900.0,
                p99_latency_ms: 2500.0,
                latency_std: 410.0,
                hour_of_day: 14.0,
                p95_p50_ratio: 7.5,
                p99_p95_ratio: 2.8,
                error_count: 35.0,
                log_event_count: 4.615,
                log_error_rate: 0.3,
            },
            confidence: Some(0.83),
            is_resolved: false,
        };

        let bytes = record.to_bytes().unwrap();
        let decoded = AnomalyRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);

        // Severity re-derivable from the persisted score and error rate.
        assert_eq!(
            Severity::classify(decoded.score, decoded.features.error_rate, decoded.threshold),
            Some(decoded.severity)
        );
    }
}
