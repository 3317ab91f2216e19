//! Single persistent alarm driving one-shot, delayed, and cron schedules
//! (spec §4.F).
//!
//! There is exactly one "alarm" conceptually: the caller (the agent's
//! lifecycle loop) asks [`Scheduler::next_alarm_at`] for the next instant to
//! wake up at and calls [`Scheduler::fire_due`] when that instant arrives.
//! `fire_due` is idempotent with respect to being called early — it only
//! acts on rows whose `time <= now`.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::core::ambient::AmbientContext;
use crate::core::event_bus::{EventBus, ObservabilityEvent};
use crate::domain::errors::{ScheduleError, ScheduleResult};
use crate::domain::models::{Schedule, ScheduleKind};
use crate::domain::ports::ScheduleRepository;

use super::callable::CallableRegistry;

pub struct Scheduler {
    repo: Arc<dyn ScheduleRepository>,
    callbacks: Arc<CallableRegistry>,
    events: Arc<EventBus>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn ScheduleRepository>, callbacks: Arc<CallableRegistry>, events: Arc<EventBus>) -> Self {
        Self { repo, callbacks, events }
    }

    /// Validate `expr` up front so `schedule_cron` fails fast instead of at
    /// the first firing attempt.
    fn next_cron_fire(expr: &str, after: DateTime<Utc>) -> ScheduleResult<DateTime<Utc>> {
        let schedule = cron::Schedule::from_str(expr).map_err(|e| ScheduleError::InvalidCron(expr.to_string(), e.to_string()))?;
        schedule
            .after(&after)
            .next()
            .ok_or_else(|| ScheduleError::InvalidCron(expr.to_string(), "no future occurrence".to_string()))
    }

    pub async fn schedule_at(&self, callback: &str, payload: Value, at: DateTime<Utc>) -> ScheduleResult<Schedule> {
        self.require_callable(callback)?;
        let schedule = Schedule::one_shot(callback, payload, at);
        self.repo.insert(&schedule).await.map_err(ScheduleError::Storage)?;
        Ok(schedule)
    }

    pub async fn schedule_after(&self, callback: &str, payload: Value, delay_secs: i64) -> ScheduleResult<Schedule> {
        self.require_callable(callback)?;
        let schedule = Schedule::delayed(callback, payload, delay_secs);
        self.repo.insert(&schedule).await.map_err(ScheduleError::Storage)?;
        Ok(schedule)
    }

    pub async fn schedule_cron(&self, callback: &str, payload: Value, cron_expr: &str) -> ScheduleResult<Schedule> {
        self.require_callable(callback)?;
        let next = Self::next_cron_fire(cron_expr, Utc::now())?;
        let schedule = Schedule::cron(callback, payload, cron_expr, next);
        self.repo.insert(&schedule).await.map_err(ScheduleError::Storage)?;
        Ok(schedule)
    }

    fn require_callable(&self, callback: &str) -> ScheduleResult<()> {
        if !self.callbacks.is_callable(callback) {
            return Err(ScheduleError::UnknownCallback(callback.to_string()));
        }
        Ok(())
    }

    /// Delete the row and return whether it existed. Caller is responsible
    /// for recomputing the alarm afterward.
    pub async fn cancel(&self, id: Uuid) -> ScheduleResult<bool> {
        self.repo.delete(id).await.map_err(ScheduleError::Storage)
    }

    pub async fn get(&self, id: Uuid) -> ScheduleResult<Option<Schedule>> {
        self.repo.get(id).await.map_err(ScheduleError::Storage)
    }

    pub async fn list_all(&self) -> ScheduleResult<Vec<Schedule>> {
        self.repo.list_all().await.map_err(ScheduleError::Storage)
    }

    /// The instant the next alarm should fire at, or `None` if the table is
    /// empty (no alarm needed).
    pub async fn next_alarm_at(&self) -> ScheduleResult<Option<DateTime<Utc>>> {
        self.repo.earliest_time().await.map_err(ScheduleError::Storage)
    }

    /// Fire every row with `time <= now`. For cron rows, recompute the next
    /// occurrence and update in place; for one-shot/delayed rows, delete.
    /// A callback error is caught and logged, not propagated — the row is
    /// still retired so a broken schedule can't wedge the alarm forever.
    pub async fn fire_due<F>(&self, now: DateTime<Utc>, context_for: F) -> ScheduleResult<()>
    where
        F: Fn() -> AmbientContext,
    {
        let due = self.repo.due(now).await.map_err(ScheduleError::Storage)?;

        for row in due {
            let ctx = context_for();
            let args = vec![row.payload.clone(), serde_json::to_value(&schedule_view(&row)).unwrap_or(Value::Null)];

            match self.callbacks.get(&row.callback) {
                Ok(crate::core::rpc::Handler::Unary(f)) => {
                    let fut = f(args);
                    if let Err(error) = crate::core::ambient::with_agent_context(ctx, fut).await {
                        self.events.emit(ObservabilityEvent::new(
                            "schedule.error",
                            format!("scheduled callback {:?} failed", row.callback),
                            serde_json::json!({ "scheduleId": row.id.to_string(), "error": error }),
                        ));
                    }
                }
                Ok(crate::core::rpc::Handler::Streaming(_)) => {
                    self.events.emit(ObservabilityEvent::new(
                        "schedule.error",
                        format!("scheduled callback {:?} is streaming, not callable as a schedule", row.callback),
                        serde_json::json!({ "scheduleId": row.id.to_string() }),
                    ));
                }
                Err(err) => {
                    self.events.emit(ObservabilityEvent::new(
                        "schedule.error",
                        format!("scheduled callback {:?} is not registered", row.callback),
                        serde_json::json!({ "scheduleId": row.id.to_string(), "error": err.to_string() }),
                    ));
                }
            }

            match row.kind {
                ScheduleKind::Cron => {
                    let expr = row.cron_expr.as_deref().unwrap_or_default();
                    match Self::next_cron_fire(expr, now) {
                        Ok(next) => {
                            if let Err(err) = self.repo.update_time(row.id, next).await {
                                self.events.emit(ObservabilityEvent::new(
                                    "schedule.error",
                                    "failed to reschedule cron row",
                                    serde_json::json!({ "scheduleId": row.id.to_string(), "error": err.to_string() }),
                                ));
                            }
                        }
                        Err(err) => {
                            self.events.emit(ObservabilityEvent::new(
                                "schedule.error",
                                "cron expression stopped producing future occurrences, dropping row",
                                serde_json::json!({ "scheduleId": row.id.to_string(), "error": err.to_string() }),
                            ));
                            let _ = self.repo.delete(row.id).await;
                        }
                    }
                }
                ScheduleKind::OneShot | ScheduleKind::Delayed => {
                    let _ = self.repo.delete(row.id).await;
                }
            }
        }

        Ok(())
    }
}

#[derive(serde::Serialize)]
struct ScheduleView {
    id: Uuid,
    callback: String,
    kind: &'static str,
    time: DateTime<Utc>,
}

fn schedule_view(schedule: &Schedule) -> ScheduleView {
    ScheduleView { id: schedule.id, callback: schedule.callback.clone(), kind: schedule.kind.as_str(), time: schedule.time }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteScheduleRepository};
    use crate::core::agent::AgentHandle;
    use crate::core::callable::HandlerRegistration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> AmbientContext {
        AmbientContext::new(AgentHandle::for_test())
    }

    async fn new_scheduler(registry: CallableRegistry) -> Scheduler {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteScheduleRepository::new(pool));
        Scheduler::new(repo, Arc::new(registry), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn rejects_unregistered_callback() {
        let scheduler = new_scheduler(CallableRegistry::new()).await;
        let err = scheduler.schedule_at("ghost", Value::Null, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownCallback(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_cron_expression() {
        let mut registry = CallableRegistry::new();
        registry.register(HandlerRegistration::unary("tick", |_| Box::pin(async { Ok(Value::Null) })));
        let scheduler = new_scheduler(registry).await;

        let err = scheduler.schedule_cron("tick", Value::Null, "not a cron expr").await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron(_, _)));
    }

    #[tokio::test]
    async fn one_shot_is_deleted_after_firing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut registry = CallableRegistry::new();
        registry.register(HandlerRegistration::unary("tick", move |_| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
        }));
        let scheduler = new_scheduler(registry).await;

        let past = Utc::now() - chrono::Duration::seconds(5);
        let schedule = scheduler.schedule_at("tick", Value::Null, past).await.unwrap();

        scheduler.fire_due(Utc::now(), ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.get(schedule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cron_row_survives_with_updated_time() {
        let mut registry = CallableRegistry::new();
        registry.register(HandlerRegistration::unary("tick", |_| Box::pin(async { Ok(Value::Null) })));
        let scheduler = new_scheduler(registry).await;

        let schedule = scheduler.schedule_cron("tick", Value::Null, "* * * * * *").await.unwrap();
        let original_time = schedule.time;

        scheduler.fire_due(original_time, ctx).await.unwrap();

        let updated = scheduler.get(schedule.id).await.unwrap().unwrap();
        assert!(updated.time > original_time);
    }
}
