//! FIFO work queue item (spec §3 "Queue item", §4.E).

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// One row of the persisted work queue, ordered FIFO by `created_at`.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub payload: Value,
    pub callback: String,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(callback: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            callback: callback.into(),
            created_at: Utc::now(),
        }
    }
}
