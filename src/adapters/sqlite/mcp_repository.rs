//! SQLite-backed `McpServerRepository`.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::StorageResult;
use crate::domain::models::McpServerRecord;
use crate::domain::ports::McpServerRepository;

pub struct SqliteMcpServerRepository {
    pool: SqlitePool,
}

impl SqliteMcpServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type McpRow = (String, String, String, String, Option<String>, Option<String>, String);

fn row_to_record(row: McpRow) -> StorageResult<McpServerRecord> {
    let (id, name, server_url, callback_url, client_id, auth_url, server_options) = row;
    Ok(McpServerRecord {
        id,
        name,
        server_url,
        callback_url,
        client_id,
        auth_url,
        server_options: serde_json::from_str(&server_options)?,
    })
}

#[async_trait]
impl McpServerRepository for SqliteMcpServerRepository {
    async fn upsert(&self, record: &McpServerRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO cf_agents_mcp_servers (id, name, server_url, callback_url, client_id, auth_url, server_options)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, server_url = excluded.server_url,
                callback_url = excluded.callback_url, client_id = excluded.client_id,
                auth_url = excluded.auth_url, server_options = excluded.server_options",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.server_url)
        .bind(&record.callback_url)
        .bind(&record.client_id)
        .bind(&record.auth_url)
        .bind(serde_json::to_string(&record.server_options)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<McpServerRecord>> {
        let row: Option<McpRow> = sqlx::query_as(
            "SELECT id, name, server_url, callback_url, client_id, auth_url, server_options
             FROM cf_agents_mcp_servers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_record).transpose()
    }

    async fn list_all(&self) -> StorageResult<Vec<McpServerRecord>> {
        let rows: Vec<McpRow> = sqlx::query_as(
            "SELECT id, name, server_url, callback_url, client_id, auth_url, server_options FROM cf_agents_mcp_servers",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM cf_agents_mcp_servers WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn clear_oauth_pending(&self, id: &str) -> StorageResult<()> {
        sqlx::query("UPDATE cf_agents_mcp_servers SET auth_url = NULL, callback_url = '' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_pending_callback_urls(&self) -> StorageResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, callback_url FROM cf_agents_mcp_servers WHERE callback_url != ''")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn oauth_anti_replay_clears_both_fields() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteMcpServerRepository::new(pool);

        let record = McpServerRecord {
            id: "srv1".into(),
            name: "example".into(),
            server_url: "https://example.com/mcp".into(),
            callback_url: "https://agent.example/callback/srv1".into(),
            client_id: None,
            auth_url: Some("https://example.com/authorize".into()),
            server_options: serde_json::json!({}),
        };
        repo.upsert(&record).await.unwrap();
        assert_eq!(repo.list_pending_callback_urls().await.unwrap().len(), 1);

        repo.clear_oauth_pending("srv1").await.unwrap();
        let fetched = repo.get("srv1").await.unwrap().unwrap();
        assert!(fetched.auth_url.is_none());
        assert_eq!(fetched.callback_url, "");
        assert!(repo.list_pending_callback_urls().await.unwrap().is_empty());
    }
}
