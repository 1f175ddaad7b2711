use thiserror::Error;

/// Errors raised by the log client adapter.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log client config error: {0}")]
    Config(String),

    #[error("produce failed: {0}")]
    Produce(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("offset commit failed: {0}")]
    Commit(String),

    #[error("log unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl LogError {
    /// Transient errors are retried with bounded backoff; everything else is
    /// surfaced to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Unavailable(_) | LogError::Timeout(_))
    }
}
