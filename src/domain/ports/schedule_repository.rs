//! Scheduler port (spec §3 "Schedule", §4.F).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::StorageResult;
use crate::domain::models::Schedule;

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert(&self, schedule: &Schedule) -> StorageResult<()>;

    async fn get(&self, id: Uuid) -> StorageResult<Option<Schedule>>;

    async fn delete(&self, id: Uuid) -> StorageResult<bool>;

    /// Recompute `time` for a cron row after it fires.
    async fn update_time(&self, id: Uuid, next: DateTime<Utc>) -> StorageResult<()>;

    /// All rows with `time <= now`, in ascending `time` order.
    async fn due(&self, now: DateTime<Utc>) -> StorageResult<Vec<Schedule>>;

    /// The minimum `time` across all rows, used to consolidate the single
    /// persisted alarm.
    async fn earliest_time(&self) -> StorageResult<Option<DateTime<Utc>>>;

    async fn list_all(&self) -> StorageResult<Vec<Schedule>>;
}
