//! SQLite-backed `TaskRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageResult;
use crate::domain::models::{Task, TaskEvent, TaskStatus};
use crate::domain::ports::task_repository::{TaskFilter, TaskRepository};

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_events(&self, task_id: Uuid) -> StorageResult<Vec<TaskEvent>> {
        let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT id, event_type, data, timestamp FROM cf_agents_task_events WHERE task_id = ? ORDER BY timestamp ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, event_type, data, timestamp)| {
                Ok(TaskEvent {
                    id: parse_uuid(&id)?,
                    event_type,
                    data: data.map(|d| serde_json::from_str(&d)).transpose()?,
                    timestamp: parse_datetime(&timestamp)?,
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn row_to_task(
        &self,
        id: String,
        method: String,
        input: String,
        status: String,
        result: Option<String>,
        error: Option<String>,
        progress: Option<i64>,
        timeout_ms: Option<i64>,
        deadline_at: Option<String>,
        queue_id: Option<String>,
        workflow_instance_id: Option<String>,
        workflow_binding: Option<String>,
        retries: i64,
        created_at: String,
        started_at: Option<String>,
        completed_at: Option<String>,
    ) -> StorageResult<Task> {
        let task_id = parse_uuid(&id)?;
        Ok(Task {
            id: task_id,
            method,
            input: serde_json::from_str(&input)?,
            status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Pending),
            result: result.map(|r| serde_json::from_str(&r)).transpose()?,
            error,
            events: self.load_events(task_id).await?,
            progress: progress.map(|p| p as u8),
            timeout_ms: timeout_ms.map(|t| t as u64),
            deadline_at: parse_optional_datetime(deadline_at)?,
            queue_id: parse_optional_uuid(queue_id)?,
            workflow_instance_id,
            workflow_binding,
            retries: retries as u32,
            created_at: parse_datetime(&created_at)?,
            started_at: parse_optional_datetime(started_at)?,
            completed_at: parse_optional_datetime(completed_at)?,
        })
    }
}

type TaskRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
);

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO cf_agents_tasks
             (id, method, input, status, result, error, progress, timeout_ms, deadline_at, queue_id,
              workflow_instance_id, workflow_binding, retries, created_at, started_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(&task.method)
        .bind(serde_json::to_string(&task.input)?)
        .bind(task.status.as_str())
        .bind(task.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&task.error)
        .bind(task.progress.map(i64::from))
        .bind(task.timeout_ms.map(|t| t as i64))
        .bind(task.deadline_at.map(|d| d.to_rfc3339()))
        .bind(task.queue_id.map(|q| q.to_string()))
        .bind(&task.workflow_instance_id)
        .bind(&task.workflow_binding)
        .bind(i64::from(task.retries))
        .bind(task.created_at.to_rfc3339())
        .bind(task.started_at.map(|d| d.to_rfc3339()))
        .bind(task.completed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        for event in &task.events {
            self.insert_event(task.id, event).await?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT id, method, input, status, result, error, progress, timeout_ms, deadline_at, queue_id,
                    workflow_instance_id, workflow_binding, retries, created_at, started_at, completed_at
             FROM cf_agents_tasks WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(self.materialize(r).await?)),
            None => Ok(None),
        }
    }

    async fn update(&self, task: &Task) -> StorageResult<()> {
        sqlx::query(
            "UPDATE cf_agents_tasks SET method = ?, input = ?, status = ?, result = ?, error = ?, progress = ?,
             timeout_ms = ?, deadline_at = ?, queue_id = ?, workflow_instance_id = ?, workflow_binding = ?,
             retries = ?, started_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(&task.method)
        .bind(serde_json::to_string(&task.input)?)
        .bind(task.status.as_str())
        .bind(task.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&task.error)
        .bind(task.progress.map(i64::from))
        .bind(task.timeout_ms.map(|t| t as i64))
        .bind(task.deadline_at.map(|d| d.to_rfc3339()))
        .bind(task.queue_id.map(|q| q.to_string()))
        .bind(&task.workflow_instance_id)
        .bind(&task.workflow_binding)
        .bind(i64::from(task.retries))
        .bind(task.started_at.map(|d| d.to_rfc3339()))
        .bind(task.completed_at.map(|d| d.to_rfc3339()))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        // Events are append-only; only events not yet persisted are new.
        let persisted = self.load_events(task.id).await?;
        let persisted_ids: std::collections::HashSet<_> = persisted.iter().map(|e| e.id).collect();
        for event in &task.events {
            if !persisted_ids.contains(&event.id) {
                self.insert_event(task.id, event).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StorageResult<()> {
        sqlx::query("DELETE FROM cf_agents_tasks WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> StorageResult<Vec<Task>> {
        let rows: Vec<TaskRow> = if let Some(status) = filter.status {
            sqlx::query_as(
                "SELECT id, method, input, status, result, error, progress, timeout_ms, deadline_at, queue_id,
                        workflow_instance_id, workflow_binding, retries, created_at, started_at, completed_at
                 FROM cf_agents_tasks WHERE status = ? ORDER BY created_at ASC",
            )
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT id, method, input, status, result, error, progress, timeout_ms, deadline_at, queue_id,
                        workflow_instance_id, workflow_binding, retries, created_at, started_at, completed_at
                 FROM cf_agents_tasks ORDER BY created_at ASC",
            )
            .fetch_all(&self.pool)
            .await?
        };

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(self.materialize(row).await?);
        }
        Ok(tasks)
    }

    async fn list_pending_or_running(&self) -> StorageResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, method, input, status, result, error, progress, timeout_ms, deadline_at, queue_id,
                    workflow_instance_id, workflow_binding, retries, created_at, started_at, completed_at
             FROM cf_agents_tasks WHERE status IN ('pending', 'running') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(self.materialize(row).await?);
        }
        Ok(tasks)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query(
            "DELETE FROM cf_agents_tasks WHERE status IN ('completed', 'failed', 'aborted') AND created_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl SqliteTaskRepository {
    async fn insert_event(&self, task_id: Uuid, event: &TaskEvent) -> StorageResult<()> {
        sqlx::query("INSERT INTO cf_agents_task_events (id, task_id, event_type, data, timestamp) VALUES (?, ?, ?, ?, ?)")
            .bind(event.id.to_string())
            .bind(task_id.to_string())
            .bind(&event.event_type)
            .bind(event.data.as_ref().map(serde_json::to_string).transpose()?)
            .bind(event.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn materialize(&self, row: TaskRow) -> StorageResult<Task> {
        let (
            id,
            method,
            input,
            status,
            result,
            error,
            progress,
            timeout_ms,
            deadline_at,
            queue_id,
            workflow_instance_id,
            workflow_binding,
            retries,
            created_at,
            started_at,
            completed_at,
        ) = row;
        self.row_to_task(
            id,
            method,
            input,
            status,
            result,
            error,
            progress,
            timeout_ms,
            deadline_at,
            queue_id,
            workflow_instance_id,
            workflow_binding,
            retries,
            created_at,
            started_at,
            completed_at,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteTaskRepository::new(pool);

        let mut task = Task::new("echo", serde_json::json!("hi"), None, 0);
        task.mark_running();
        task.add_event(TaskEvent::new("retry", None));
        repo.create(&task).await.unwrap();

        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Running);
        assert_eq!(fetched.events.len(), 1);
    }

    #[tokio::test]
    async fn cold_start_cleanup_candidates() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteTaskRepository::new(pool);

        let mut pending = Task::new("a", serde_json::json!(null), None, 0);
        let mut done = Task::new("b", serde_json::json!(null), None, 0);
        done.mark_running();
        done.mark_completed(serde_json::json!("ok"));
        repo.create(&pending).await.unwrap();
        repo.create(&done).await.unwrap();

        let stale = repo.list_pending_or_running().await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, pending.id);
        pending.mark_failed("restarted");
        repo.update(&pending).await.unwrap();
        assert!(repo.list_pending_or_running().await.unwrap().is_empty());
    }
}
