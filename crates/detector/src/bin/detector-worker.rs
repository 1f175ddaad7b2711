//! detector-worker — consumes the event log, maintains per-service
//! sliding windows, scores closed windows with the model artifact, and
//! republishes anomaly records.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use helios_core::error::exit;
use helios_core::Config;
use helios_detector::{Detector, DetectorMetrics, ModelArtifact};
use helios_rohrpost::{KafkaConsumerAdapter, KafkaProducer, LogConsumer, LogProducer};

// ── CLI ─────────────────────────────────────────────────────────────

/// Helios anomaly detector — sliding windows + isolation-forest scoring.
#[derive(Parser, Debug)]
#[command(name = "detector-worker", version, about)]
struct Cli {
    /// Hard shutdown deadline in seconds after the signal.
    #[arg(long, env = "DETECTOR_SHUTDOWN_TIMEOUT", default_value_t = 30)]
    shutdown_timeout: u64,
}

// ── main ────────────────────────────────────────────────────────────

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

    let cli = Cli::parse();

    info!("Starting Helios detector");

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invalid");
        process::exit(exit::CONFIG);
    }
    config.log_summary();

    let model = match ModelArtifact::load(&config.detector.model_path) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            error!(error = %e, path = %config.detector.model_path, "cannot load model artifact");
            process::exit(exit::MODEL_UNREADABLE);
        }
    };

    let consumer: Arc<dyn LogConsumer> = match KafkaConsumerAdapter::new(
        &config.log,
        &config.log.events_topic,
        &config.log.detector_group,
    ) {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            error!(error = %e, "event log unreachable at startup");
            process::exit(exit::LOG_UNREACHABLE);
        }
    };

    let producer: Arc<dyn LogProducer> = match KafkaProducer::new(&config.log) {
        Ok(producer) => Arc::new(producer),
        Err(e) => {
            error!(error = %e, "cannot create alerts producer");
            process::exit(exit::LOG_UNREACHABLE);
        }
    };

    // Persistence is optional: the alerts topic is the primary output, so a
    // missing or unreachable store only disables the history table.
    let pool = if config.db.is_configured() {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.db.max_connections)
            .connect(&config.db.database_url())
            .await
        {
            Ok(pool) => {
                info!(host = %config.db.host, "anomaly persistence enabled");
                Some(pool)
            }
            Err(e) => {
                warn!(error = %e, "store unreachable, continuing without anomaly persistence");
                None
            }
        }
    } else {
        None
    };

    let metrics = DetectorMetrics::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    spawn_metrics_server(config.server.metrics_port, metrics.clone(), shutdown_rx.clone());

    let detector = Detector::new(
        consumer,
        producer,
        model,
        &config.detector,
        config.log.anomalies_topic.clone(),
        pool,
        metrics,
    );

    let detector_handle = tokio::spawn(detector.run(shutdown_rx));

    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    match tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), detector_handle).await {
        Ok(Ok(Ok(()))) => info!("detector exited cleanly"),
        Ok(Ok(Err(e))) => warn!(error = %e, "detector exited with error"),
        Ok(Err(e)) => warn!(error = %e, "detector task panicked"),
        Err(_) => warn!("detector drain timed out, forcing shutdown"),
    }

    Ok(())
}

/// Expose detector metrics on the metrics port.
fn spawn_metrics_server(
    port: u16,
    metrics: DetectorMetrics,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let metrics = metrics.clone();
                async move {
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                        metrics.gather(),
                    )
                }
            }),
        );

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
    });
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn wait_for_signal() {
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
