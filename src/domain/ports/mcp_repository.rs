//! MCP server record port (spec §3 "MCP server record", §4.I).

use async_trait::async_trait;

use crate::domain::errors::StorageResult;
use crate::domain::models::McpServerRecord;

#[async_trait]
pub trait McpServerRepository: Send + Sync {
    async fn upsert(&self, record: &McpServerRecord) -> StorageResult<()>;

    async fn get(&self, id: &str) -> StorageResult<Option<McpServerRecord>>;

    async fn list_all(&self) -> StorageResult<Vec<McpServerRecord>>;

    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Clear `auth_url` and `callback_url` atomically — the OAuth
    /// anti-replay invariant.
    async fn clear_oauth_pending(&self, id: &str) -> StorageResult<()>;

    /// All currently-pending callback URL prefixes, for the manager's
    /// in-memory callback-recognition cache.
    async fn list_pending_callback_urls(&self) -> StorageResult<Vec<(String, String)>>;
}
