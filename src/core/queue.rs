//! FIFO work queue with single-flight drain (spec §4.E).
//!
//! `enqueue` validates the callback is registered, inserts a row, and kicks
//! off an asynchronous drain. Drain loops until the table is empty; a
//! `flushing` flag guards re-entrancy so concurrent `enqueue` calls don't
//! spawn overlapping drain loops. A callback failure propagates to the
//! event bus and leaves the row in place — it is retried on the next drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::core::ambient::AmbientContext;
use crate::core::callable::CallableRegistry;
use crate::core::event_bus::{EventBus, ObservabilityEvent};
use crate::domain::errors::{QueueError, QueueResult};
use crate::domain::models::QueueItem;
use crate::domain::ports::QueueRepository;

/// Handed to a dispatched queue callback: the payload it enqueued with and
/// the full row, mirroring the source's `(payload, queueItem)` signature.
pub struct QueueDispatch {
    pub payload: Value,
    pub item: QueueItem,
}

pub struct Queue {
    repo: Arc<dyn QueueRepository>,
    callbacks: Arc<CallableRegistry>,
    events: Arc<EventBus>,
    flushing: AtomicBool,
}

impl Queue {
    pub fn new(repo: Arc<dyn QueueRepository>, callbacks: Arc<CallableRegistry>, events: Arc<EventBus>) -> Self {
        Self { repo, callbacks, events, flushing: AtomicBool::new(false) }
    }

    /// Validate `callback` is registered, insert the row, and drain.
    /// `ambient` binds the agent identity the dispatched callback runs
    /// under; `context_for` builds a fresh [`AmbientContext`] per
    /// dispatched item (each gets its own scope, no connection attached).
    pub async fn enqueue<F>(&self, callback: &str, payload: Value, context_for: F) -> QueueResult<Uuid>
    where
        F: Fn() -> AmbientContext + Send + Sync,
    {
        if !self.callbacks.is_callable(callback) {
            return Err(QueueError::UnknownCallback(callback.to_string()));
        }

        let item = QueueItem::new(callback, payload);
        let id = item.id;
        self.repo.insert(&item).await.map_err(QueueError::Storage)?;

        self.drain(context_for).await;
        Ok(id)
    }

    /// Loop dispatching the oldest row until the table is empty. Re-entrant
    /// calls while a drain is already running are no-ops; the in-flight
    /// drain will see the newly inserted row on its next iteration.
    async fn drain<F>(&self, context_for: F)
    where
        F: Fn() -> AmbientContext,
    {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return;
        }

        loop {
            let Ok(Some(item)) = self.repo.peek_front().await else { break };

            let handler = match self.callbacks.get(&item.callback) {
                Ok(handler) => handler,
                Err(err) => {
                    self.events.emit(ObservabilityEvent::new(
                        "queue.error",
                        format!("queue callback {:?} is not registered", item.callback),
                        serde_json::json!({ "itemId": item.id.to_string(), "error": err.to_string() }),
                    ));
                    break;
                }
            };

            let ctx = context_for();
            let args = vec![item.payload.clone(), serde_json::to_value(&queue_item_view(&item)).unwrap_or(Value::Null)];

            let result = match handler {
                crate::core::rpc::Handler::Unary(f) => {
                    let fut = f(args);
                    crate::core::ambient::with_agent_context(ctx, fut).await
                }
                crate::core::rpc::Handler::Streaming(_) => {
                    Err("queue callbacks must be unary".to_string())
                }
            };

            match result {
                Ok(_) => {
                    if let Err(err) = self.repo.delete(item.id).await {
                        self.events.emit(ObservabilityEvent::new(
                            "queue.error",
                            "failed to delete completed queue item",
                            serde_json::json!({ "itemId": item.id.to_string(), "error": err.to_string() }),
                        ));
                        break;
                    }
                }
                Err(error) => {
                    self.events.emit(ObservabilityEvent::new(
                        "queue.error",
                        format!("queue callback {:?} failed", item.callback),
                        serde_json::json!({ "itemId": item.id.to_string(), "error": error }),
                    ));
                    break;
                }
            }
        }

        self.flushing.store(false, Ordering::Release);
    }

    pub async fn dequeue(&self, id: Uuid) -> QueueResult<()> {
        self.repo.delete(id).await.map_err(QueueError::Storage)
    }

    pub async fn dequeue_all(&self) -> QueueResult<u64> {
        self.repo.delete_all().await.map_err(QueueError::Storage)
    }

    pub async fn dequeue_all_by_callback(&self, callback: &str) -> QueueResult<u64> {
        self.repo.delete_all_by_callback(callback).await.map_err(QueueError::Storage)
    }

    pub async fn get_queue_item(&self, id: Uuid) -> QueueResult<Option<QueueItem>> {
        self.repo.get(id).await.map_err(QueueError::Storage)
    }

    pub async fn find_by_payload_field(&self, key: &str, value: &Value) -> QueueResult<Vec<QueueItem>> {
        self.repo.find_by_payload_field(key, value).await.map_err(QueueError::Storage)
    }

    pub async fn len(&self) -> QueueResult<u64> {
        self.repo.len().await.map_err(QueueError::Storage)
    }
}

#[derive(serde::Serialize)]
struct QueueItemView {
    id: Uuid,
    callback: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn queue_item_view(item: &QueueItem) -> QueueItemView {
    QueueItemView { id: item.id, callback: item.callback.clone(), created_at: item.created_at }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteQueueRepository};
    use crate::core::agent::AgentHandle;
    use crate::core::callable::HandlerRegistration;
    use std::sync::atomic::AtomicUsize;

    fn ctx() -> AmbientContext {
        AmbientContext::new(AgentHandle::for_test())
    }

    #[tokio::test]
    async fn enqueue_rejects_unregistered_callback() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteQueueRepository::new(pool));
        let queue = Queue::new(repo, Arc::new(CallableRegistry::new()), Arc::new(EventBus::new()));

        let err = queue.enqueue("ghost", serde_json::json!({}), ctx).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownCallback(_)));
    }

    #[tokio::test]
    async fn drain_runs_to_empty_and_deletes_rows() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteQueueRepository::new(pool));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut registry = CallableRegistry::new();
        registry.register(HandlerRegistration::unary("process", move |_args| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
        }));

        let queue = Queue::new(repo, Arc::new(registry), Arc::new(EventBus::new()));
        queue.enqueue("process", serde_json::json!({"n": 1}), ctx).await.unwrap();
        queue.enqueue("process", serde_json::json!({"n": 2}), ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_callback_leaves_item_in_queue() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteQueueRepository::new(pool));

        let mut registry = CallableRegistry::new();
        registry.register(HandlerRegistration::unary("boom", |_args| {
            Box::pin(async move { Err("boom".to_string()) })
        }));

        let queue = Queue::new(repo, Arc::new(registry), Arc::new(EventBus::new()));
        queue.enqueue("boom", serde_json::json!({}), ctx).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
