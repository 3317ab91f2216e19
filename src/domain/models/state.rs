//! The agent's single-slot typed state record (spec §3 "State", §4.D).

use chrono::{DateTime, Utc};
use serde_json::Value;

/// At most one row per agent. `value` is an opaque serialized blob; `written`
/// tracks whether `set_state` has ever run, which decides whether
/// `initial_state` still applies on next read.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub value: Option<Value>,
    pub written: bool,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    pub fn empty() -> Self {
        Self {
            value: None,
            written: false,
            updated_at: Utc::now(),
        }
    }

    /// Apply `initial_state` exactly once: only when `written` is unset.
    pub fn materialize_initial(&mut self, initial: Value) {
        if !self.written {
            self.value = Some(initial);
            self.written = true;
        }
    }
}
