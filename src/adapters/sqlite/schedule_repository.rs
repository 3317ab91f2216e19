//! SQLite-backed `ScheduleRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::StorageResult;
use crate::domain::models::{Schedule, ScheduleKind};
use crate::domain::ports::ScheduleRepository;

use super::{parse_datetime, parse_uuid};

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type ScheduleRow = (String, String, String, String, String, Option<i64>, Option<String>, String);

fn row_to_schedule(row: ScheduleRow) -> StorageResult<Schedule> {
    let (id, callback, payload, kind, time, delay_secs, cron_expr, created_at) = row;
    Ok(Schedule {
        id: parse_uuid(&id)?,
        callback,
        payload: serde_json::from_str(&payload)?,
        kind: ScheduleKind::from_str(&kind).unwrap_or(ScheduleKind::OneShot),
        time: parse_datetime(&time)?,
        delay_secs,
        cron_expr,
        created_at: parse_datetime(&created_at)?,
    })
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn insert(&self, schedule: &Schedule) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO cf_agents_schedules (id, callback, payload, kind, time, delay_secs, cron_expr, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.callback)
        .bind(serde_json::to_string(&schedule.payload)?)
        .bind(schedule.kind.as_str())
        .bind(schedule.time.to_rfc3339())
        .bind(schedule.delay_secs)
        .bind(&schedule.cron_expr)
        .bind(schedule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<Schedule>> {
        let row: Option<ScheduleRow> = sqlx::query_as(
            "SELECT id, callback, payload, kind, time, delay_secs, cron_expr, created_at FROM cf_agents_schedules WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_schedule).transpose()
    }

    async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM cf_agents_schedules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_time(&self, id: Uuid, next: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query("UPDATE cf_agents_schedules SET time = ? WHERE id = ?")
            .bind(next.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> StorageResult<Vec<Schedule>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT id, callback, payload, kind, time, delay_secs, cron_expr, created_at
             FROM cf_agents_schedules WHERE time <= ? ORDER BY time ASC",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_schedule).collect()
    }

    async fn earliest_time(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT MIN(time) FROM cf_agents_schedules")
            .fetch_optional(&self.pool)
            .await?;
        match row.and_then(|(t,)| t) {
            Some(t) => Ok(Some(parse_datetime(&t)?)),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> StorageResult<Vec<Schedule>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT id, callback, payload, kind, time, delay_secs, cron_expr, created_at FROM cf_agents_schedules ORDER BY time ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_schedule).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn earliest_time_tracks_minimum() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteScheduleRepository::new(pool);
        assert!(repo.earliest_time().await.unwrap().is_none());

        let far = Schedule::one_shot("tick", serde_json::json!({}), Utc::now() + chrono::Duration::hours(1));
        let near = Schedule::one_shot("tick", serde_json::json!({}), Utc::now() + chrono::Duration::seconds(5));
        repo.insert(&far).await.unwrap();
        repo.insert(&near).await.unwrap();

        let earliest = repo.earliest_time().await.unwrap().unwrap();
        assert_eq!(earliest.timestamp(), near.time.timestamp());
    }

    #[tokio::test]
    async fn cancel_unknown_id_returns_false() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteScheduleRepository::new(pool);
        assert!(!repo.delete(Uuid::new_v4()).await.unwrap());
    }
}
