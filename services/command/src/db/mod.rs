//! Postgres persistence for the event log.
//!
//! [`Database`] owns the connection pool and applies the migrations under
//! `migrations/`; [`PgEventLog`] is the [`crate::eventstore::EventLog`] over
//! the `events` table.

mod error;
mod event_log;

pub use error::DbError;
pub use event_log::PgEventLog;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/iam";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Directory holding the SQL migrations.
    pub migrations_dir: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            migrations_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        }
    }
}

/// Reads `var`, keeping `default` when unset and failing on unparsable values.
fn env_or<T>(var: &'static str, default: T) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| DbError::Config {
            var,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`,
    /// `DB_ACQUIRE_TIMEOUT_SECS` and `IAM_MIGRATIONS_DIR`.
    pub fn from_env() -> Result<Self, DbError> {
        let defaults = Self::default();
        let config = Self {
            database_url: env_or("DATABASE_URL", defaults.database_url)?,
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", defaults.min_connections)?,
            acquire_timeout: Duration::from_secs(env_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )?),
            migrations_dir: env_or("IAM_MIGRATIONS_DIR", defaults.migrations_dir)?,
            ..defaults
        };
        if config.min_connections > config.max_connections {
            return Err(DbError::Config {
                var: "DB_MIN_CONNECTIONS",
                message: format!(
                    "{} exceeds DB_MAX_CONNECTIONS {}",
                    config.min_connections, config.max_connections
                ),
            });
        }
        Ok(config)
    }
}

/// Connection pool plus the migrations that belong to it.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    migrations_dir: PathBuf,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self {
            pool,
            migrations_dir: config.migrations_dir.clone(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Applies pending migrations, loaded from disk at runtime.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!(migrations_dir = %self.migrations_dir.display(), "Running database migrations");
        let migrator = Migrator::new(self.migrations_dir.clone())
            .await
            .map_err(DbError::Migration)?;
        migrator.run(&self.pool).await.map_err(DbError::Migration)?;
        info!("Database migrations complete");
        Ok(())
    }

    pub fn event_log(&self) -> PgEventLog {
        PgEventLog::new(self.pool.clone())
    }
}
