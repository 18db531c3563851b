//! Database layer for the Kiln build orchestrator.
//!
//! Provides PostgreSQL implementations of the core store traits, a log
//! bus over Postgres LISTEN/NOTIFY, and in-memory equivalents for tests
//! and local runs. Secret values are sealed with AES-256-GCM at rest.

pub mod crypto;
pub mod error;
pub mod memory;
pub mod notify;
pub mod repo;

pub use crypto::SecretCipher;
pub use error::{DbError, DbResult};
pub use memory::{MemoryBuildStore, MemoryLogBus, MemoryProjectStore, MemorySecretStore};
pub use notify::PgLogBus;
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Round-trip to the database; used by readiness checks.
pub async fn ping(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
