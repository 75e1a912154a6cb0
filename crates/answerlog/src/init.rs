// Initialization utilities for server mode
//
// Storage pool + schema provisioning and logging/tracing setup

use anyhow::{Context, Result};
use answerlog_config::{Dialect, LogFormat, RuntimeConfig, StorageConfig};
use answerlog_core::SqlStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

static SQLITE_MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");
static POSTGRES_MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

const SQLITE_MEMORY_DSN: &str = ":memory:";

/// Open the configured database and make sure the `answers` table exists.
pub async fn open_store(config: &StorageConfig) -> Result<SqlStore> {
    info!(dialect = %config.dialect, "Opening answer store");

    match config.dialect {
        Dialect::Sqlite => {
            let (options, pool_options) = if config.dsn == SQLITE_MEMORY_DSN {
                // Every connection to :memory: is a separate database, so pin one
                // connection for the lifetime of the pool.
                (
                    SqliteConnectOptions::from_str("sqlite::memory:")?,
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None),
                )
            } else {
                let options = if config.dsn.starts_with("sqlite:") {
                    SqliteConnectOptions::from_str(&config.dsn)
                        .with_context(|| format!("Invalid sqlite DSN: {}", config.dsn))?
                } else {
                    SqliteConnectOptions::new().filename(&config.dsn)
                };
                (
                    options.create_if_missing(true),
                    SqlitePoolOptions::new().max_connections(config.max_connections),
                )
            };

            let pool = pool_options
                .acquire_timeout(config.acquire_timeout())
                .connect_with(options)
                .await
                .with_context(|| format!("Failed to open sqlite database: {}", config.dsn))?;

            SQLITE_MIGRATIONS
                .run(&pool)
                .await
                .context("Failed to apply sqlite migrations")?;

            Ok(SqlStore::Sqlite(pool))
        }
        Dialect::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout())
                .connect(&config.dsn)
                .await
                .context("Failed to connect to postgres")?;

            POSTGRES_MIGRATIONS
                .run(&pool)
                .await
                .context("Failed to apply postgres migrations")?;

            Ok(SqlStore::Postgres(pool))
        }
    }
}

/// Initialize tracing/logging from RuntimeConfig
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore the error if a subscriber is already installed (idempotent)
    let _ = match config.server.log_format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}
