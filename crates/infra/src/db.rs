//! Database adapters (connection pool and migrations wiring).

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

/// Schema of the shared ledger and state tables (`crates/infra/migrations`).
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Build the shared Postgres pool.
///
/// Connections are shared by all tenants; isolation comes from the per
/// transaction session pinning done by [`crate::executor::IsolatedExecutor`].
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await?;

    info!(max_connections = config.max_connections, "connected to postgres");
    Ok(pool)
}

/// Apply pending migrations.
///
/// Run with an owner role: the row-level security policies are forced, so
/// the application role only ever sees rows of the pinned tenant.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!("database migrations applied");
    Ok(())
}
