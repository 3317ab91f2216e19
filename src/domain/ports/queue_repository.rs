//! FIFO queue port (spec §3 "Queue item", §4.E).

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::StorageResult;
use crate::domain::models::QueueItem;

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn insert(&self, item: &QueueItem) -> StorageResult<()>;

    /// The oldest not-yet-dispatched item, by `created_at`, if any.
    async fn peek_front(&self) -> StorageResult<Option<QueueItem>>;

    async fn get(&self, id: Uuid) -> StorageResult<Option<QueueItem>>;

    async fn delete(&self, id: Uuid) -> StorageResult<()>;

    async fn delete_all(&self) -> StorageResult<u64>;

    async fn delete_all_by_callback(&self, callback: &str) -> StorageResult<u64>;

    /// Structured-field lookup: `payload->>key == value` when `key` has no
    /// nesting; otherwise callers fall back to `list_all` + in-process scan.
    async fn find_by_payload_field(&self, key: &str, value: &Value) -> StorageResult<Vec<QueueItem>>;

    async fn list_all(&self) -> StorageResult<Vec<QueueItem>>;

    async fn len(&self) -> StorageResult<u64>;
}
