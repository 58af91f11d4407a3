use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod queries;

/// Open the pool used by the record sink and the read endpoints.
///
/// Each completed iteration writes a single row, so a small pool covers many
/// concurrent jobs; connections are not held open while a job waits on the
/// remote services.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await?;
    tracing::info!(size = pool.size(), "Database pool ready");
    Ok(pool)
}

/// Apply the embedded `iterations` schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
