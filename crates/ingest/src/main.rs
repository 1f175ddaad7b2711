use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use helios_core::error::exit;
use helios_core::Config;
use helios_ingest::{build_router, AppState, IngestMetrics};
use helios_rohrpost::{KafkaProducer, LogProducer};

/// Producer flush deadline during shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    helios_core::config::load_dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!("Starting Helios ingestion service");

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invalid");
        process::exit(exit::CONFIG);
    }
    config.log_summary();

    let producer = match KafkaProducer::new(&config.log) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "failed to create log producer");
            process::exit(exit::LOG_UNREACHABLE);
        }
    };
    if let Err(e) = producer.health().await {
        error!(error = %e, "event log unreachable at startup");
        process::exit(exit::LOG_UNREACHABLE);
    }

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let metrics = IngestMetrics::new();
    let state = Arc::new(AppState::new(
        producer.clone(),
        config.log.events_topic.clone(),
        hostname,
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let metrics_handle = helios_ingest::metrics::spawn_metrics_server(
        config.server.metrics_port,
        metrics,
        shutdown_rx.clone(),
    );

    // The signal task flips the shared shutdown flag; the server drains on
    // it, the metrics server exits on it, and the drain deadline below is
    // measured from it.
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_tx.send(true).ok();
    });

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    let mut drain_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        while !*drain_rx.borrow() {
            if drain_rx.changed().await.is_err() {
                break;
            }
        }
    });

    // Stop accepting on the signal and drain in-flight requests, but only
    // up to the deadline; after that the server future is dropped and any
    // remaining connections are aborted.
    let mut deadline_rx = shutdown_rx;
    let drain_deadline = async move {
        while !*deadline_rx.borrow() {
            if deadline_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        tokio::time::sleep(DRAIN_TIMEOUT).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain deadline exceeded, aborting in-flight requests"
            );
        }
    }

    // Flush anything the producer still buffers, then stop the metrics
    // server.
    info!("draining producer");
    if let Err(e) = producer.flush(DRAIN_TIMEOUT).await {
        warn!(error = %e, "producer flush failed during shutdown");
    }
    metrics_handle.await.ok();

    info!("Ingestion service stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
