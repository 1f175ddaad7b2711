//! Prometheus metrics for the ingestion service, exposed in text exposition
//! format on a dedicated port.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Ingestion metric handles. Cloning shares the underlying registry.
#[derive(Clone)]
pub struct IngestMetrics {
    registry: Registry,
    /// `helios_events_ingested_total{service,level,status}`
    pub events_ingested: IntCounterVec,
    /// `helios_ingestion_latency_seconds{endpoint}`
    pub ingestion_latency: HistogramVec,
    /// `helios_log_producer_errors_total`
    pub producer_errors: IntCounter,
}

impl IngestMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_ingested = IntCounterVec::new(
            Opts::new("helios_events_ingested_total", "Total number of events ingested"),
            &["service", "level", "status"],
        )
        .unwrap();

        let ingestion_latency = HistogramVec::new(
            HistogramOpts::new(
                "helios_ingestion_latency_seconds",
                "Event ingestion latency in seconds",
            ),
            &["endpoint"],
        )
        .unwrap();

        let producer_errors = IntCounter::new(
            "helios_log_producer_errors_total",
            "Total number of log producer errors",
        )
        .unwrap();

        registry.register(Box::new(events_ingested.clone())).unwrap();
        registry.register(Box::new(ingestion_latency.clone())).unwrap();
        registry.register(Box::new(producer_errors.clone())).unwrap();

        Self {
            registry,
            events_ingested,
            ingestion_latency,
            producer_errors,
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

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the metrics HTTP server on the given port.
///
/// Returns a `JoinHandle` that resolves when the server shuts down.
pub fn spawn_metrics_server(
    port: u16,
    metrics: IngestMetrics,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = axum::Router::new()
            .route("/metrics", axum::routing::get(metrics_handler))
            .with_state(metrics);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "failed to bind metrics HTTP server");
                return;
            }
        };

        info!(port, "metrics HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        info!("metrics HTTP server stopped");
    })
}

/// Axum handler: `GET /metrics` → Prometheus text format.
async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<IngestMetrics>,
) -> impl axum::response::IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.gather(),
    )
}
