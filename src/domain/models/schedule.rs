//! Persisted alarm schedule (spec §3 "Schedule", §4.F).

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Which of the three schedule kinds a row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fires once at `time`, then is deleted.
    OneShot,
    /// Fires once at `created_at + delay`, then is deleted.
    Delayed,
    /// Fires on every matching tick; `time` is recomputed after each firing.
    Cron,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneShot => "one-shot",
            Self::Delayed => "delayed",
            Self::Cron => "cron",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "one-shot" => Some(Self::OneShot),
            "delayed" => Some(Self::Delayed),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }
}

/// A future invocation the scheduler's single persisted alarm is responsible
/// for firing. `time` is always the *next* firing instant; for cron rows it
/// is rewritten after every firing.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub id: Uuid,
    pub callback: String,
    pub payload: Value,
    pub kind: ScheduleKind,
    pub time: DateTime<Utc>,
    pub delay_secs: Option<i64>,
    pub cron_expr: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn one_shot(callback: impl Into<String>, payload: Value, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            callback: callback.into(),
            payload,
            kind: ScheduleKind::OneShot,
            time: at,
            delay_secs: None,
            cron_expr: None,
            created_at: Utc::now(),
        }
    }

    pub fn delayed(callback: impl Into<String>, payload: Value, delay_secs: i64) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            callback: callback.into(),
            payload,
            kind: ScheduleKind::Delayed,
            time: created_at + chrono::Duration::seconds(delay_secs),
            delay_secs: Some(delay_secs),
            cron_expr: None,
            created_at,
        }
    }

    pub fn cron(callback: impl Into<String>, payload: Value, cron_expr: impl Into<String>, next: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            callback: callback.into(),
            payload,
            kind: ScheduleKind::Cron,
            time: next,
            delay_secs: None,
            cron_expr: Some(cron_expr.into()),
            created_at: Utc::now(),
        }
    }
}
