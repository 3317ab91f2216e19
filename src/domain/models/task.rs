//! Tracked async work item (spec §3 "Task"/"Task event", §4.G).

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// `pending -> running -> (completed | failed | aborted)`. No transition
/// leaves a terminal state; `pending -> aborted` is valid (cancel before
/// dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Whether `self -> next` is a legal transition per spec §4.G.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Pending, Self::Running | Self::Aborted) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Aborted) => true,
            _ => false,
        }
    }
}

/// An append-only event recorded against a task's lifetime (e.g. `"retry"`).
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub id: Uuid,
    pub event_type: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A tracked unit of asynchronous work with status, events, progress,
/// deadlines, and optional durable workflow backing.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub method: String,
    pub input: Value,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub events: Vec<TaskEvent>,
    pub progress: Option<u8>,
    pub timeout_ms: Option<u64>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub queue_id: Option<Uuid>,
    pub workflow_instance_id: Option<String>,
    pub workflow_binding: Option<String>,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(method: impl Into<String>, input: Value, timeout_ms: Option<u64>, retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            input,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            events: Vec::new(),
            progress: None,
            timeout_ms,
            deadline_at: None,
            queue_id: None,
            workflow_instance_id: None,
            workflow_binding: None,
            retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Enters `running`; sets `started_at` and, if `timeout_ms` is set, the
    /// absolute `deadline_at`.
    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        if let Some(ms) = self.timeout_ms {
            self.deadline_at = Some(now + chrono::Duration::milliseconds(ms as i64));
        }
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.progress = Some(100);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Aborted;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn add_event(&mut self, event: TaskEvent) {
        self.events.push(event);
    }

    pub fn set_progress(&mut self, pct: u8) {
        self.progress = Some(pct.min(100));
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline_at.is_some_and(|d| now >= d)
    }
}
