//! SQLite-backed `QueueRepository`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageResult;
use crate::domain::models::QueueItem;
use crate::domain::ports::QueueRepository;

use super::{parse_datetime, parse_uuid};

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_item(id: String, payload: String, callback: String, created_at: String) -> StorageResult<QueueItem> {
    Ok(QueueItem {
        id: parse_uuid(&id)?,
        payload: serde_json::from_str(&payload)?,
        callback,
        created_at: parse_datetime(&created_at)?,
    })
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn insert(&self, item: &QueueItem) -> StorageResult<()> {
        sqlx::query("INSERT INTO cf_agents_queues (id, payload, callback, created_at) VALUES (?, ?, ?, ?)")
            .bind(item.id.to_string())
            .bind(serde_json::to_string(&item.payload)?)
            .bind(&item.callback)
            .bind(item.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn peek_front(&self) -> StorageResult<Option<QueueItem>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, payload, callback, created_at FROM cf_agents_queues ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, payload, callback, created_at)| row_to_item(id, payload, callback, created_at))
            .transpose()
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<QueueItem>> {
        let row: Option<(String, String, String, String)> =
            sqlx::query_as("SELECT id, payload, callback, created_at FROM cf_agents_queues WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id, payload, callback, created_at)| row_to_item(id, payload, callback, created_at))
            .transpose()
    }

    async fn delete(&self, id: Uuid) -> StorageResult<()> {
        sqlx::query("DELETE FROM cf_agents_queues WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM cf_agents_queues").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_by_callback(&self, callback: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM cf_agents_queues WHERE callback = ?")
            .bind(callback)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_payload_field(&self, key: &str, value: &Value) -> StorageResult<Vec<QueueItem>> {
        // Structured JSON-path lookup for an unnested key; falls back to a
        // full scan when the value isn't a SQLite-comparable scalar.
        if let Some(scalar) = scalar_text(value) {
            let path = format!("$.{key}");
            let rows: Vec<(String, String, String, String)> = sqlx::query_as(
                "SELECT id, payload, callback, created_at FROM cf_agents_queues WHERE json_extract(payload, ?) = ? ORDER BY created_at ASC",
            )
            .bind(path)
            .bind(scalar)
            .fetch_all(&self.pool)
            .await?;

            return rows
                .into_iter()
                .map(|(id, payload, callback, created_at)| row_to_item(id, payload, callback, created_at))
                .collect();
        }

        let all = self.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|item| item.payload.get(key) == Some(value))
            .collect())
    }

    async fn list_all(&self) -> StorageResult<Vec<QueueItem>> {
        let rows: Vec<(String, String, String, String)> =
            sqlx::query_as("SELECT id, payload, callback, created_at FROM cf_agents_queues ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id, payload, callback, created_at)| row_to_item(id, payload, callback, created_at))
            .collect()
    }

    async fn len(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cf_agents_queues").fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn fifo_ordering_by_created_at() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteQueueRepository::new(pool);

        let mut a = QueueItem::new("tick", serde_json::json!({"n": 1}));
        let mut b = QueueItem::new("tick", serde_json::json!({"n": 2}));
        a.created_at = chrono::Utc::now() - chrono::Duration::seconds(2);
        b.created_at = chrono::Utc::now() - chrono::Duration::seconds(1);

        repo.insert(&b).await.unwrap();
        repo.insert(&a).await.unwrap();

        let front = repo.peek_front().await.unwrap().unwrap();
        assert_eq!(front.id, a.id);
    }

    #[tokio::test]
    async fn find_by_payload_field_unnested() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteQueueRepository::new(pool);
        let item = QueueItem::new("dispatch", serde_json::json!({"task_id": "abc"}));
        repo.insert(&item).await.unwrap();

        let found = repo
            .find_by_payload_field("task_id", &serde_json::Value::String("abc".into()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, item.id);
    }
}
