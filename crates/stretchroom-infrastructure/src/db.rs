//! SQLite pool registration and embedded migrations.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: sqlx connection string, required (`sqlite::memory:` works)
//! - `DATABASE_MIGRATE`: apply migrations before the listener binds
//! - `DATABASE_TIMEOUT_SECONDS`: pool acquire timeout (default: 30)
//! - `DATABASE_MAX_CONNECTIONS`: pool size for file databases (default: 5)

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::{env_flag, env_parse, env_seconds, env_var, ConfigError};
use crate::health::{HealthCheck, HealthCheckConfiguration, HealthCheckResult, HealthRegistry};
use crate::host::BeforeHostingStarted;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to apply migrations: {0}")]
    Migrate(#[from] MigrateError),
}

/// Connection settings for the service database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbContextOptions {
    pub connection_string: String,
    pub migrate_db: bool,
    pub timeout: Duration,
    pub max_connections: u32,
}

impl DbContextOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            migrate_db: false,
            timeout: DEFAULT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_migrations(mut self, migrate_db: bool) -> Self {
        self.migrate_db = migrate_db;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let options = Self {
            connection_string: env_var("DATABASE_URL").unwrap_or_default(),
            migrate_db: env_flag("DATABASE_MIGRATE"),
            timeout: env_seconds("DATABASE_TIMEOUT_SECONDS")?.unwrap_or(DEFAULT_TIMEOUT),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")?.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::missing("connection_string"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("max_connections", "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }

    /// In-memory databases live as long as their single connection.
    pub fn is_in_memory(&self) -> bool {
        let url = self.connection_string.as_str();
        url.contains(":memory:") || url.contains("mode=memory")
    }
}

/// Build the pool described by `options`.
pub async fn register_db(options: &DbContextOptions) -> Result<SqlitePool, DbError> {
    options.validate()?;
    let url = options.connection_string.trim();

    let connect = SqliteConnectOptions::from_str(url)
        .map_err(|source| DbError::Connect {
            url: url.to_string(),
            source,
        })?
        .create_if_missing(true);

    let mut pool = SqlitePoolOptions::new().acquire_timeout(options.timeout);
    pool = if options.is_in_memory() {
        pool.max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool.max_connections(options.max_connections)
    };

    let pool = pool
        .connect_with(connect)
        .await
        .map_err(|source| DbError::Connect {
            url: url.to_string(),
            source,
        })?;
    tracing::info!(
        in_memory = options.is_in_memory(),
        max_connections = options.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

/// Applies an embedded migrator before the host starts listening.
pub struct MigrationApplier {
    pool: SqlitePool,
    migrator: &'static Migrator,
    enabled: bool,
}

impl MigrationApplier {
    pub fn new(pool: SqlitePool, migrator: &'static Migrator, options: &DbContextOptions) -> Self {
        Self {
            pool,
            migrator,
            enabled: options.migrate_db,
        }
    }

    pub async fn apply(&self) -> Result<(), DbError> {
        if !self.enabled {
            tracing::debug!("database migrations disabled");
            return Ok(());
        }
        self.migrator.run(&self.pool).await?;
        tracing::info!(migrations = self.migrator.iter().count(), "database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl BeforeHostingStarted for MigrationApplier {
    fn name(&self) -> &str {
        "migrations"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.apply().await?;
        Ok(())
    }
}

/// Runs `SELECT 1` on the pool.
#[derive(Debug, Clone)]
pub struct DatabaseHealthCheck {
    pool: SqlitePool,
}

impl DatabaseHealthCheck {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheck for DatabaseHealthCheck {
    async fn check(&self) -> HealthCheckResult {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => HealthCheckResult::healthy(),
            Err(e) => HealthCheckResult::unhealthy(e.to_string()),
        }
    }
}

impl HealthRegistry {
    /// Register a [`DatabaseHealthCheck`] named `db-{n}`.
    pub fn add_database(&mut self, pool: SqlitePool, configuration: Option<HealthCheckConfiguration>) -> &mut Self {
        self.add_generated(
            "db",
            Arc::new(DatabaseHealthCheck::new(pool)),
            configuration.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;

    static MIGRATOR: Migrator = sqlx::migrate!("./tests/migrations");

    fn memory() -> DbContextOptions {
        DbContextOptions::new("sqlite::memory:").with_migrations(true)
    }

    #[test]
    fn test_options_validation() {
        assert!(memory().validate().is_ok());
        assert_eq!(
            DbContextOptions::new(" ").validate(),
            Err(ConfigError::missing("connection_string"))
        );
        let mut zero = memory();
        zero.max_connections = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(memory().is_in_memory());
        assert!(DbContextOptions::new("sqlite:file:test?mode=memory&cache=shared").is_in_memory());
        assert!(!DbContextOptions::new("sqlite:data/app.db").is_in_memory());
    }

    #[tokio::test]
    async fn test_register_and_migrate_in_memory() {
        let options = memory();
        let pool = register_db(&options).await.unwrap();
        MigrationApplier::new(pool.clone(), &MIGRATOR, &options)
            .run()
            .await
            .unwrap();

        sqlx::query("INSERT INTO probe (name) VALUES ('a')")
            .execute(&pool)
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM probe")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_disabled_migrations_are_skipped() {
        let options = DbContextOptions::new("sqlite::memory:");
        let pool = register_db(&options).await.unwrap();
        MigrationApplier::new(pool.clone(), &MIGRATOR, &options)
            .apply()
            .await
            .unwrap();
        assert!(sqlx::query("SELECT * FROM probe").execute(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("app.db").display());
        let pool = register_db(&DbContextOptions::new(url)).await.unwrap();
        let result = DatabaseHealthCheck::new(pool).check().await;
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_check_after_close() {
        let pool = register_db(&memory()).await.unwrap();
        let mut registry = HealthRegistry::new();
        registry.add_database(pool.clone(), None);
        assert_eq!(registry.names(), vec!["db-1"]);
        assert_eq!(registry.check_all().await.status, HealthStatus::Healthy);

        pool.close().await;
        assert_eq!(registry.check_all().await.status, HealthStatus::Unhealthy);
    }
}
