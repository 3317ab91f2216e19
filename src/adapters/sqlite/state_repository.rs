//! SQLite-backed `StateRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{StorageError, StorageResult};
use crate::domain::models::AgentState;
use crate::domain::ports::StateRepository;

pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateRepository for SqliteStateRepository {
    async fn get(&self) -> StorageResult<Option<AgentState>> {
        let row: Option<(Option<String>, i64, String)> =
            sqlx::query_as("SELECT value, written, updated_at FROM cf_agents_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        let Some((value, written, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(AgentState {
            value: value.map(|v| serde_json::from_str(&v)).transpose()?,
            written: written != 0,
            updated_at: parse_datetime(&updated_at)?,
        }))
    }

    async fn set(&self, state: &AgentState) -> StorageResult<()> {
        let value = state.value.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT INTO cf_agents_state (id, value, written, updated_at) VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET value = excluded.value, written = excluded.written, updated_at = excluded.updated_at",
        )
        .bind(value)
        .bind(state.written as i64)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM cf_agents_state WHERE id = 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn round_trips_state() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteStateRepository::new(pool);

        assert!(repo.get().await.unwrap().is_none());

        let mut state = AgentState::empty();
        state.materialize_initial(serde_json::json!({"count": 1}));
        repo.set(&state).await.unwrap();

        let fetched = repo.get().await.unwrap().unwrap();
        assert!(fetched.written);
        assert_eq!(fetched.value, Some(serde_json::json!({"count": 1})));
    }
}
