use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use helios_core::config::DbConfig;

use crate::error::StorageError;

/// Create a PostgreSQL connection pool and apply migrations.
///
/// Callers treat failure here as fatal at startup (exit code 3).
pub async fn init_pg_pool(config: &DbConfig) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url())
        .await?;

    info!(host = %config.host, db = %config.name, "PostgreSQL connected");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("database migrations applied");

    Ok(pool)
}
