use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::config::{AppConfig, DatabaseConfig};
use crate::store::PostgresStore;

pub type DbPool = Pool<Postgres>;

/// Schema for batches, their errors and the case tables they write.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn connect(database_url: &str, settings: &DatabaseConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout())
        .connect(database_url)
        .await
        .with_context(|| "failed to connect to Postgres")?;
    info!(
        max_connections = settings.max_connections,
        "connected to Postgres"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .with_context(|| "failed to run database migrations")
}

/// Opens the import store described by `config`. Migrations run when the
/// config asks for them or when `force_migrations` is set.
pub async fn open_store(config: &AppConfig, force_migrations: bool) -> Result<PostgresStore> {
    let pool = connect(config.database_url()?, &config.database).await?;
    if force_migrations || config.database.run_migrations {
        run_migrations(&pool).await?;
    } else {
        info!("skipping migrations at configuration request");
    }
    Ok(PostgresStore::new(pool))
}
