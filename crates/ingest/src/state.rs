use std::sync::Arc;

use helios_rohrpost::LogProducer;

use crate::metrics::IngestMetrics;

/// Shared state for the ingestion HTTP handlers.
///
/// Requests are independent: the only shared pieces are the producer handle
/// (safe for concurrent callers) and the metric counters.
pub struct AppState {
    /// Producer onto the durable event log.
    pub producer: Arc<dyn LogProducer>,
    /// Topic accepted events are published to.
    pub events_topic: String,
    /// Identifies this ingestion node in enriched events.
    pub hostname: String,
    pub metrics: IngestMetrics,
}

impl AppState {
    pub fn new(
        producer: Arc<dyn LogProducer>,
        events_topic: impl Into<String>,
        hostname: impl Into<String>,
        metrics: IngestMetrics,
    ) -> Self {
        Self {
            producer,
            events_topic: events_topic.into(),
            hostname: hostname.into(),
            metrics,
        }
    }
}
