pub mod anomaly;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;

pub use anomaly::{AnomalyRecord, FeatureVector, Severity, FEATURE_NAMES};
pub use config::Config;
pub use error::{ConfigError, EventError};
pub use event::{Event, Level};
