use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event severity level. The set is closed — anything else is rejected
/// at the ingestion edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// Whether this level counts towards a window's error rate.
    pub fn is_error(&self) -> bool {
        matches!(self, Level::Error | Level::Critical)
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" => Ok(Level::Critical),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured log event flowing through the pipeline.
///
/// `timestamp`, `ingested_at`, and `host` are `None` on a freshly parsed
/// caller payload and are guaranteed populated after
/// [`crate::codec::enrich`]. The serialized form is the canonical JSON
/// published to the event log (metadata keys are sorted — `serde_json::Map`
/// is BTree-backed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event happened, per the emitting service. Filled with the
    /// arrival instant during enrichment when the caller omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Emitting service name; doubles as the log partition key.
    pub service: String,

    pub level: Level,

    pub message: String,

    /// Free-form metadata. Recognised keys: `latency_ms`, `endpoint`,
    /// `error_code`. Everything else passes through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Set by the ingestion service on acceptance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<DateTime<Utc>>,

    /// Ingestion node that accepted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Event {
    /// Latency in milliseconds from `metadata.latency_ms`, if present and
    /// strictly positive.
    pub fn latency_ms(&self) -> Option<f64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("latency_ms"))
            .and_then(|v| v.as_f64())
            .filter(|l| *l > 0.0)
    }

    /// Endpoint from `metadata.endpoint`, if present.
    pub fn endpoint(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("endpoint"))
            .and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_roundtrip() {
        for raw in ["DEBUG", "INFO", "WARN", "ERROR", "CRITICAL"] {
            let level: Level = raw.parse().unwrap();
            assert_eq!(level.as_str(), raw);
        }
        assert!("warn".parse::<Level>().is_err());
        assert!("FATAL".parse::<Level>().is_err());
    }

    #[test]
    fn error_levels() {
        assert!(Level::Error.is_error());
        assert!(Level::Critical.is_error());
        assert!(!Level::Warn.is_error());
    }

    #[test]
    fn latency_ignores_non_positive() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("latency_ms".into(), serde_json::json!(0));
        let event = Event {
            timestamp: None,
            service: "api".into(),
            level: Level::Info,
            message: "ok".into(),
            metadata: Some(metadata),
            trace_id: None,
            span_id: None,
            ingested_at: None,
            host: None,
        };
        assert_eq!(event.latency_ms(), None);
    }
}
