//! storage-writer — consumes the event log and writes batches into the
//! time-series store, committing offsets only after each transaction lands.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use helios_core::error::exit;
use helios_core::Config;
use helios_rohrpost::{KafkaConsumerAdapter, LogConsumer};
use helios_storage::{PgSink, StorageMetrics, StorageWriter};

// ── CLI ─────────────────────────────────────────────────────────────

/// Helios storage writer — log consumer group → batched store inserts.
#[derive(Parser, Debug)]
#[command(name = "storage-writer", version, about)]
struct Cli {
    /// Hard shutdown deadline in seconds after the signal.
    #[arg(long, env = "STORAGE_SHUTDOWN_TIMEOUT", default_value_t = 30)]
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

    info!("Starting Helios storage writer");

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invalid");
        process::exit(exit::CONFIG);
    }
    config.log_summary();

    let pool = match helios_storage::db::init_pg_pool(&config.db).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "time-series store unreachable at startup");
            process::exit(exit::STORE_UNREACHABLE);
        }
    };

    let consumer: Arc<dyn LogConsumer> = match KafkaConsumerAdapter::new(
        &config.log,
        &config.log.events_topic,
        &config.log.storage_group,
    ) {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            error!(error = %e, "event log unreachable at startup");
            process::exit(exit::LOG_UNREACHABLE);
        }
    };

    let metrics = StorageMetrics::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    spawn_metrics_server(config.server.metrics_port, metrics.clone(), shutdown_rx.clone());

    let writer = StorageWriter::new(
        consumer,
        Arc::new(PgSink::new(pool)),
        config.log.events_topic.clone(),
        config.writer.clone(),
        metrics,
    );

    let writer_handle = tokio::spawn(writer.run(shutdown_rx));

    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    // Give the writer its drain window, then force termination; whatever is
    // lost here gets redelivered from the last committed offset.
    match tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), writer_handle).await {
        Ok(Ok(Ok(()))) => info!("storage writer exited cleanly"),
        Ok(Ok(Err(e))) => warn!(error = %e, "storage writer exited with error"),
        Ok(Err(e)) => warn!(error = %e, "storage writer task panicked"),
        Err(_) => warn!("storage writer drain timed out, forcing shutdown"),
    }

    Ok(())
}

/// Expose writer metrics on the metrics port.
fn spawn_metrics_server(
    port: u16,
    metrics: StorageMetrics,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let app = axum::Router::new()
            .route(
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
