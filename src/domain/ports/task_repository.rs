//! Task tracker port (spec §3 "Task"/"Task event", §4.G).

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::StorageResult;
use crate::domain::models::{Task, TaskStatus};

/// Optional filter for `list`; all fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> StorageResult<()>;

    async fn get(&self, id: Uuid) -> StorageResult<Option<Task>>;

    /// Replace the row wholesale, including its event list.
    async fn update(&self, task: &Task) -> StorageResult<()>;

    /// Only valid for tasks whose status is terminal; the caller enforces
    /// that invariant before calling.
    async fn delete(&self, id: Uuid) -> StorageResult<()>;

    async fn list(&self, filter: TaskFilter) -> StorageResult<Vec<Task>>;

    /// Tasks in `pending` or `running` at startup, for cold-start cleanup.
    async fn list_pending_or_running(&self) -> StorageResult<Vec<Task>>;

    async fn delete_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> StorageResult<u64>;
}
