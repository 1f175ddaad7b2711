use thiserror::Error;

/// Maximum allowed length of the `service` field in characters.
pub const MAX_SERVICE_LEN: usize = 255;

/// Event-scoped errors raised while decoding or validating an incoming event.
///
/// These are caller-facing: the ingestion service maps every variant to a
/// 400 response whose `details` field carries the first failing constraint.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event must be a JSON object")]
    NotAnObject,

    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("field {0} must be a string")]
    NotAString(&'static str),

    #[error("service name exceeds {MAX_SERVICE_LEN} characters (got {0})")]
    ServiceTooLong(usize),

    #[error("unknown level: {0} (expected DEBUG|INFO|WARN|ERROR|CRITICAL)")]
    UnknownLevel(String),

    #[error("metadata must be a JSON object")]
    MetadataNotObject,

    #[error("invalid {field} timestamp: {reason}")]
    InvalidTimestamp { field: &'static str, reason: String },
}

/// Configuration errors detected at startup. Fatal — mapped to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Process exit codes shared by all Helios binaries.
pub mod exit {
    /// Configuration error at startup.
    pub const CONFIG: i32 = 2;
    /// Time-series store unreachable at startup.
    pub const STORE_UNREACHABLE: i32 = 3;
    /// Event log unreachable at startup.
    pub const LOG_UNREACHABLE: i32 = 4;
    /// Model artifact missing, unreadable, or unsupported.
    pub const MODEL_UNREADABLE: i32 = 5;
}
