//! # Database Support
//!
//! Connection pool construction and the embedded migrator.
//!
//! ```text
//! migrations/
//! ├── 20250301000000_enable_pgmq.sql
//! ├── 20250301000001_create_execution_ledger.sql
//! └── 20250301000002_create_customer_tables.sql
//! ```

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

/// Ledger tables, demonstration customer tables and the pgmq extension
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub type MigrationResult<T> = Result<T, sqlx::migrate::MigrateError>;

/// Build a pool from configuration
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        database_url = %config.sanitized_url(),
        max_connections = config.max_connections,
        "Connecting to database"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> MigrationResult<()> {
    info!("Running migrations");
    MIGRATOR.run(pool).await?;
    info!("Migrations complete");
    Ok(())
}
