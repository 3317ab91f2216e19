//! Single-slot typed state with change bit and broadcast-on-write (spec
//! §3 "State", §4.D).

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::ambient::ConnectionId;
use crate::core::connections::ConnectionRegistry;
use crate::core::event_bus::{EventBus, ObservabilityEvent};
use crate::core::rpc::OutboundFrame;
use crate::domain::errors::StorageResult;
use crate::domain::models::AgentState;
use crate::domain::ports::StateRepository;

/// A hook invoked after every successful `set`, mirroring the source's
/// `onStateUpdate(state, source)`.
pub type StateUpdateHook = Arc<dyn Fn(&Value, Option<ConnectionId>) + Send + Sync>;

pub struct StateStore {
    repo: Arc<dyn StateRepository>,
    connections: Arc<ConnectionRegistry>,
    events: Arc<EventBus>,
    cached: RwLock<Option<AgentState>>,
    initial_state: Option<Value>,
    on_update: RwLock<Vec<StateUpdateHook>>,
}

impl StateStore {
    pub fn new(
        repo: Arc<dyn StateRepository>,
        connections: Arc<ConnectionRegistry>,
        events: Arc<EventBus>,
        initial_state: Option<Value>,
    ) -> Self {
        Self { repo, connections, events, cached: RwLock::new(None), initial_state, on_update: RwLock::new(Vec::new()) }
    }

    pub async fn on_update(&self, hook: StateUpdateHook) {
        self.on_update.write().await.push(hook);
    }

    /// Lazily materialize from storage on first access; if the row has
    /// never been written and `initial_state` is set, write it once and
    /// return it.
    pub async fn get(&self) -> StorageResult<Option<Value>> {
        {
            let cached = self.cached.read().await;
            if let Some(state) = cached.as_ref() {
                return Ok(state.value.clone());
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(state) = guard.as_ref() {
            return Ok(state.value.clone());
        }

        let mut state = self.repo.get().await?.unwrap_or_else(AgentState::empty);
        if !state.written {
            if let Some(initial) = self.initial_state.clone() {
                state.materialize_initial(initial);
                self.repo.set(&state).await?;
            }
        }
        let value = state.value.clone();
        *guard = Some(state);
        Ok(value)
    }

    /// Persist `value`, mark the ever-written flag, and broadcast a `state`
    /// frame to every connection except `source`.
    pub async fn set(&self, value: Value, source: Option<ConnectionId>) -> StorageResult<()> {
        let mut state = AgentState { value: Some(value.clone()), written: true, updated_at: chrono::Utc::now() };
        self.repo.set(&state).await?;

        {
            let mut guard = self.cached.write().await;
            state.updated_at = chrono::Utc::now();
            *guard = Some(state);
        }

        self.connections.broadcast(OutboundFrame::State { state: Some(value.clone()) }, source);

        for hook in self.on_update.read().await.iter() {
            hook(&value, source);
        }

        self.events.emit(ObservabilityEvent::new(
            "state.update",
            "agent state updated",
            serde_json::json!({ "source": source.map(|c| c.0.to_string()) }),
        ));

        Ok(())
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.repo.clear().await?;
        *self.cached.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteStateRepository};

    async fn new_store(initial: Option<Value>) -> StateStore {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteStateRepository::new(pool));
        StateStore::new(repo, Arc::new(ConnectionRegistry::new()), Arc::new(EventBus::new()), initial)
    }

    #[tokio::test]
    async fn materializes_initial_state_exactly_once() {
        let store = new_store(Some(serde_json::json!({"count": 0}))).await;
        assert_eq!(store.get().await.unwrap(), Some(serde_json::json!({"count": 0})));

        store.set(serde_json::json!({"count": 1}), None).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(serde_json::json!({"count": 1})));
    }

    #[tokio::test]
    async fn broadcast_excludes_source_connection() {
        let store = new_store(None).await;
        let (a, mut rx_a) = store.connections.register();
        let (_b, mut rx_b) = store.connections.register();

        store.set(serde_json::json!({"x": 1}), Some(a)).await.unwrap();

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
