//! SQLite adapters implementing the `domain::ports` repository traits.
//!
//! Table bootstrap happens through [`migrations`]; every repository here is
//! a thin `sqlx::SqlitePool` wrapper with no business logic of its own —
//! transitions and invariants live in `core`.

pub mod connection;
pub mod mcp_repository;
pub mod migrations;
pub mod queue_repository;
pub mod schedule_repository;
pub mod state_repository;
pub mod task_repository;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use mcp_repository::SqliteMcpServerRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use queue_repository::SqliteQueueRepository;
pub use schedule_repository::SqliteScheduleRepository;
pub use state_repository::SqliteStateRepository;
pub use task_repository::SqliteTaskRepository;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{StorageError, StorageResult};

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::InvalidTimestamp(e.to_string()))
}

/// Parse an optional UUID string from a SQLite row field.
pub fn parse_optional_uuid(s: Option<String>) -> StorageResult<Option<Uuid>> {
    s.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| StorageError::InvalidTimestamp(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).map_err(|e| StorageError::InvalidTimestamp(e.to_string()))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    s.map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| StorageError::InvalidTimestamp(e.to_string()))
}

/// Open a migrated pool at `database_url`, creating the file and running
/// every embedded migration if needed (spec §4.A "table bootstrap").
pub async fn initialize_database(database_url: &str) -> Result<sqlx::SqlitePool, MigrationError> {
    let pool = create_pool(database_url, None)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: sqlx::Error::Configuration(e.to_string().into()) })?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory pool with all migrations applied. Used by repository
/// unit tests and by `core` tests that need a real `StateRepository` etc.
pub async fn create_migrated_test_pool() -> Result<sqlx::SqlitePool, MigrationError> {
    let pool = create_test_pool()
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: sqlx::Error::Configuration(e.to_string().into()) })?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Drop every `cf_agents_*` table (spec §4.A `destroy()`).
pub async fn drop_all_tables(pool: &sqlx::SqlitePool) -> Result<(), sqlx::Error> {
    for table in [
        "cf_agents_state",
        "cf_agents_queues",
        "cf_agents_schedules",
        "cf_agents_task_events",
        "cf_agents_tasks",
        "cf_agents_mcp_servers",
    ] {
        sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {table}")).execute(pool).await?;
    }
    Ok(())
}
