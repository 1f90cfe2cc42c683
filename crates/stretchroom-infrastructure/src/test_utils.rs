//! Test utilities for service testing.
//!
//! Provides an isolated in-memory database per call and JWT options with a
//! fixed signing key.

use std::time::Duration;

use sqlx::{migrate::Migrator, SqlitePool};

use crate::db::{register_db, DbContextOptions, MigrationApplier};
use crate::jwt::JwtOptions;

/// Base64 of `stretchroom-test-signing-key-0123456789`.
pub const TEST_JWT_KEY: &str = "c3RyZXRjaHJvb20tdGVzdC1zaWduaW5nLWtleS0wMTIzNDU2Nzg5";

pub const TEST_JWT_ISSUER: &str = "stretchroom-tests";
pub const TEST_JWT_AUDIENCE: &str = "stretchroom";

/// In-memory database options with migrations enabled.
pub fn memory_db_options() -> DbContextOptions {
    DbContextOptions::new("sqlite::memory:").with_migrations(true)
}

/// A fresh in-memory database with `migrator` applied.
///
/// # Panics
///
/// Panics if the pool cannot be created or a migration fails. This indicates
/// a test configuration issue.
pub async fn memory_pool(migrator: &'static Migrator) -> SqlitePool {
    let options = memory_db_options();
    let pool = register_db(&options)
        .await
        .unwrap_or_else(|e| panic!("failed to open in-memory database: {e}"));
    MigrationApplier::new(pool.clone(), migrator, &options)
        .apply()
        .await
        .unwrap_or_else(|e| panic!("failed to migrate in-memory database: {e}"));
    pool
}

/// JWT options signing with [`TEST_JWT_KEY`] and a one hour lifetime.
pub fn test_jwt_options() -> JwtOptions {
    JwtOptions {
        issuer: TEST_JWT_ISSUER.to_string(),
        audience: TEST_JWT_AUDIENCE.to_string(),
        token_time_to_live: Some(Duration::from_secs(3600)),
        base64_key: TEST_JWT_KEY.to_string(),
    }
}

/// Generate a unique request ID for testing.
pub fn test_request_id() -> String {
    format!("test-{}", uuid::Uuid::now_v7())
}
