//! Prometheus metrics for the storage writer.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

#[derive(Clone)]
pub struct StorageMetrics {
    registry: Registry,
    /// `helios_events_consumed_total{status}`
    pub events_consumed: IntCounterVec,
    /// `helios_db_write_latency_seconds`
    pub db_write_latency: Histogram,
    /// `helios_consumer_batch_size`
    pub batch_size: Histogram,
    /// `helios_events_dropped_total` — only moves when shedding is enabled.
    pub events_dropped: IntCounter,
}

impl StorageMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_consumed = IntCounterVec::new(
            Opts::new(
                "helios_events_consumed_total",
                "Total number of events consumed from the log",
            ),
            &["status"],
        )
        .unwrap();

        let db_write_latency = Histogram::with_opts(HistogramOpts::new(
            "helios_db_write_latency_seconds",
            "Database write latency in seconds",
        ))
        .unwrap();

        let batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "helios_consumer_batch_size",
                "Number of events written in each batch",
            )
            .buckets(vec![1.0, 10.0, 50.0, 100.0, 200.0, 500.0, 1000.0]),
        )
        .unwrap();

        let events_dropped = IntCounter::new(
            "helios_events_dropped_total",
            "Events shed under sustained back-pressure",
        )
        .unwrap();

        registry.register(Box::new(events_consumed.clone())).unwrap();
        registry.register(Box::new(db_write_latency.clone())).unwrap();
        registry.register(Box::new(batch_size.clone())).unwrap();
        registry.register(Box::new(events_dropped.clone())).unwrap();

        Self {
            registry,
            events_consumed,
            db_write_latency,
            batch_size,
            events_dropped,
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

impl Default for StorageMetrics {
    fn default() -> Self {
        Self::new()
    }
}
