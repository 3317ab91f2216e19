//! Tracked asynchronous work, dispatched through the queue and broadcast
//! through the state store's connection fan-out (spec §4.G).
//!
//! A task method is distinct from an RPC-callable method: it is invoked as
//! `(input, TaskContext)` rather than `(args: Vec<Value>)`, so task methods
//! live in their own [`TaskMethodRegistry`] rather than the RPC
//! [`CallableRegistry`]. `run` enqueues a `{taskId, method, input,
//! timeoutMs, retries}` row onto an internal [`Queue`] whose only
//! registered callback re-enters this tracker's dispatch protocol — built
//! with `Arc::new_cyclic` so the tracker can hand the queue a handler that
//! calls back into itself without a construction-order cycle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::ambient::AmbientContext;
use crate::core::callable::{CallableRegistry, HandlerRegistration};
use crate::core::connections::ConnectionRegistry;
use crate::core::event_bus::{EventBus, ObservabilityEvent};
use crate::core::queue::Queue;
use crate::core::rpc::OutboundFrame;
use crate::domain::errors::{TaskError, TaskResult};
use crate::domain::models::{Task, TaskEvent, TaskStatus};
use crate::domain::ports::{QueueRepository, TaskFilter, TaskRepository};

pub type TaskBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cooperative cancellation signal, checked by task methods between
/// meaningful units of work. Mirrors `AbortSignal` without pulling in a new
/// dependency for it.
#[derive(Clone)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Resolves once the signal is aborted. Dispatch uses this to race
    /// against backoff sleeps in 1-second slices.
    pub async fn aborted(&self) {
        while !self.is_aborted() {
            self.notify.notified().await;
        }
    }
}

struct AbortController {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortController {
    fn new() -> Self {
        Self { aborted: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    fn signal(&self) -> AbortSignal {
        AbortSignal { aborted: self.aborted.clone(), notify: self.notify.clone() }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Passed to a task method as its second argument.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub signal: AbortSignal,
    tracker: Weak<TaskTracker>,
}

impl TaskContext {
    pub async fn emit(&self, event_type: impl Into<String>, data: Option<Value>) {
        if let Some(tracker) = self.tracker.upgrade() {
            let _ = tracker.add_event(self.task_id, event_type.into(), data).await;
        }
    }

    pub async fn set_progress(&self, pct: u8) {
        if let Some(tracker) = self.tracker.upgrade() {
            let _ = tracker.set_progress(self.task_id, pct).await;
        }
    }
}

pub type TaskHandler = Arc<dyn Fn(Value, TaskContext) -> TaskBoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Default)]
pub struct TaskMethodRegistry {
    methods: HashMap<String, TaskHandler>,
}

impl TaskMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        method: impl Into<String>,
        f: impl Fn(Value, TaskContext) -> TaskBoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    ) {
        self.methods.insert(method.into(), Arc::new(f));
    }

    fn get(&self, method: &str) -> Option<TaskHandler> {
        self.methods.get(method).cloned()
    }
}

/// Parsed form of `options.timeout`: a plain number of milliseconds, a
/// `"Ns"` seconds literal, or a `"Nm"` minutes literal.
pub fn parse_timeout(raw: &str) -> Option<u64> {
    if let Ok(ms) = raw.parse::<u64>() {
        return Some(ms);
    }
    let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: u64 = digits.parse().ok()?;
    match unit {
        "s" => Some(n * 1_000),
        "m" => Some(n * 60_000),
        _ => None,
    }
}

const MIN_BROADCAST_INTERVAL: Duration = Duration::from_millis(500);
const MAX_BACKOFF_MS: u64 = 30_000;

pub struct TaskTracker {
    repo: Arc<dyn TaskRepository>,
    methods: Arc<TaskMethodRegistry>,
    connections: Arc<ConnectionRegistry>,
    events: Arc<EventBus>,
    queue: Arc<Queue>,
    agent: crate::core::agent::AgentHandle,
    self_ref: Weak<TaskTracker>,
    controllers: Mutex<HashMap<Uuid, AbortController>>,
    last_broadcast: Mutex<HashMap<Uuid, Instant>>,
}

impl TaskTracker {
    const DISPATCH_CALLBACK: &'static str = "__task_dispatch";

    pub fn new(
        repo: Arc<dyn TaskRepository>,
        queue_repo: Arc<dyn QueueRepository>,
        connections: Arc<ConnectionRegistry>,
        events: Arc<EventBus>,
        methods: Arc<TaskMethodRegistry>,
        agent: crate::core::agent::AgentHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let dispatch_weak = weak.clone();
            let mut registry = CallableRegistry::new();
            registry.register(HandlerRegistration::unary(Self::DISPATCH_CALLBACK, move |args| {
                let weak = dispatch_weak.clone();
                Box::pin(async move {
                    match weak.upgrade() {
                        Some(tracker) => tracker.dispatch(args).await,
                        None => Err("task tracker dropped before dispatch".to_string()),
                    }
                })
            }));

            let queue = Queue::new(queue_repo, Arc::new(registry), events.clone());

            Self {
                repo,
                methods,
                connections,
                events,
                queue: Arc::new(queue),
                agent,
                self_ref: weak.clone(),
                controllers: Mutex::new(HashMap::new()),
                last_broadcast: Mutex::new(HashMap::new()),
            }
        })
    }

    pub async fn create(&self, method: &str, input: Value, timeout_ms: Option<u64>, retries: u32) -> TaskResult<Task> {
        let task = Task::new(method, input, timeout_ms, retries);
        self.repo.create(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, true);
        Ok(task)
    }

    /// Create the record, enqueue the internal dispatch item, and return
    /// the task id. The caller (the agent's RPC/HTTP surface) is the
    /// `TaskHandle` in the sense that it holds this id going forward.
    pub async fn run(&self, method: &str, input: Value, timeout_ms: Option<u64>, retries: u32) -> TaskResult<Uuid> {
        let task = self.create(method, input.clone(), timeout_ms, retries).await?;

        let dispatch_payload = serde_json::json!({
            "taskId": task.id,
            "method": method,
            "input": input,
            "timeoutMs": timeout_ms,
            "retries": retries,
        });

        let agent = self.agent.clone();
        self.queue
            .enqueue(Self::DISPATCH_CALLBACK, dispatch_payload, move || AmbientContext::new(agent.clone()))
            .await
            .map_err(|e| TaskError::Storage(crate::domain::errors::StorageError::Migration(e.to_string())))?;

        Ok(task.id)
    }

    async fn dispatch(&self, args: Vec<Value>) -> Result<Value, String> {
        let payload = args.into_iter().next().ok_or("missing dispatch payload")?;
        let task_id: Uuid = serde_json::from_value(payload["taskId"].clone()).map_err(|e| e.to_string())?;
        let method = payload["method"].as_str().ok_or("missing method")?.to_string();
        let input = payload["input"].clone();
        let retries = payload["retries"].as_u64().unwrap_or(0) as u32;

        let Some(mut task) = self.repo.get(task_id).await.map_err(|e| e.to_string())? else {
            return Ok(Value::Null);
        };
        if task.status == TaskStatus::Aborted {
            return Ok(Value::Null);
        }

        task.mark_running();
        self.repo.update(&task).await.map_err(|e| e.to_string())?;
        self.broadcast(&task, true);

        let controller = AbortController::new();
        let signal = controller.signal();
        self.controllers.lock().unwrap().insert(task_id, controller);

        let Some(handler) = self.methods.get(&method) else {
            self.fail_if_running(task_id, format!("no task method registered for {method:?}")).await;
            self.controllers.lock().unwrap().remove(&task_id);
            return Ok(Value::Null);
        };

        let result = self.run_with_retries(task_id, &input, &handler, &signal, retries).await;
        self.controllers.lock().unwrap().remove(&task_id);
        result
    }

    async fn run_with_retries(
        &self,
        task_id: Uuid,
        input: &Value,
        handler: &TaskHandler,
        signal: &AbortSignal,
        retries: u32,
    ) -> Result<Value, String> {
        for attempt in 0..=retries {
            if signal.is_aborted() {
                return Ok(Value::Null);
            }
            if self.check_timeout(task_id).await.unwrap_or(false) {
                return Ok(Value::Null);
            }

            let ctx = TaskContext { task_id, signal: signal.clone(), tracker: self.self_weak() };
            match handler(input.clone(), ctx).await {
                Ok(result) => {
                    if self.check_timeout(task_id).await.unwrap_or(false) {
                        return Ok(Value::Null);
                    }
                    self.complete(task_id, result.clone()).await.ok();
                    return Ok(result);
                }
                Err(error) => {
                    if attempt == retries {
                        break;
                    }

                    self.add_event(task_id, "retry", Some(serde_json::json!({ "attempt": attempt, "error": error }))).await.ok();

                    let backoff_ms = (1_000u64.saturating_mul(1u64 << attempt.min(5))).min(MAX_BACKOFF_MS);
                    if self.sleep_with_checks(task_id, signal, backoff_ms).await {
                        return Ok(Value::Null);
                    }
                }
            }
        }

        self.fail_if_running(task_id, "task exhausted its retries").await;
        Ok(Value::Null)
    }

    /// Sleeps `ms` in 1-second slices, bailing early if aborted or
    /// deadlined. Returns `true` if dispatch should stop (aborted/timed
    /// out), `false` if the full sleep elapsed.
    async fn sleep_with_checks(&self, task_id: Uuid, signal: &AbortSignal, ms: u64) -> bool {
        let mut remaining = ms;
        while remaining > 0 {
            if signal.is_aborted() {
                return true;
            }
            if self.check_timeout(task_id).await.unwrap_or(false) {
                return true;
            }
            let slice = remaining.min(1_000);
            tokio::time::sleep(Duration::from_millis(slice)).await;
            remaining -= slice;
        }
        signal.is_aborted()
    }

    fn self_weak(&self) -> Weak<TaskTracker> {
        self.self_ref.clone()
    }

    /// Persists a task wholesale, used by `core::workflow_bridge` to attach
    /// `{workflow_instance_id, workflow_binding}` after a durable run
    /// starts. Not a status transition, so it bypasses `can_transition_to`.
    pub async fn save_workflow_binding(&self, task: Task) -> TaskResult<()> {
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, false);
        Ok(())
    }

    pub async fn mark_running(&self, id: Uuid) -> TaskResult<()> {
        let mut task = self.get_or_not_found(id).await?;
        if !task.status.can_transition_to(TaskStatus::Running) {
            return Err(TaskError::InvalidTransition { from: task.status.as_str().into(), to: "running".into() });
        }
        task.mark_running();
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, true);
        Ok(())
    }

    pub async fn complete(&self, id: Uuid, result: Value) -> TaskResult<()> {
        let mut task = self.get_or_not_found(id).await?;
        if !task.status.can_transition_to(TaskStatus::Completed) {
            return Ok(());
        }
        task.mark_completed(result);
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, true);
        Ok(())
    }

    pub async fn fail(&self, id: Uuid, error: impl Into<String>) -> TaskResult<()> {
        let mut task = self.get_or_not_found(id).await?;
        if !task.status.can_transition_to(TaskStatus::Failed) {
            return Ok(());
        }
        task.mark_failed(error);
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, true);
        Ok(())
    }

    async fn fail_if_running(&self, id: Uuid, error: impl Into<String>) {
        if let Ok(task) = self.repo.get(id).await {
            if task.is_some_and(|t| t.status == TaskStatus::Running) {
                let _ = self.fail(id, error).await;
            }
        }
    }

    pub async fn abort(&self, id: Uuid, reason: impl Into<String>) -> TaskResult<()> {
        let mut task = self.get_or_not_found(id).await?;
        if !task.status.can_transition_to(TaskStatus::Aborted) {
            return Ok(());
        }
        let reason = reason.into();
        task.mark_aborted(reason.clone());
        task.add_event(TaskEvent::new("abort", Some(serde_json::json!({ "reason": reason }))));
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, true);

        if let Some(controller) = self.controllers.lock().unwrap().get(&id) {
            controller.abort();
        }
        Ok(())
    }

    pub async fn cancel(&self, id: Uuid) -> TaskResult<()> {
        self.abort(id, "cancelled").await
    }

    /// Reads `deadline_at` and aborts with `"Task timed out"` if exceeded.
    /// Deadlines live in the DB, not in-process state, so they survive a
    /// restart mid-task.
    pub async fn check_timeout(&self, id: Uuid) -> TaskResult<bool> {
        let task = self.get_or_not_found(id).await?;
        if task.status == TaskStatus::Running && task.is_past_deadline(Utc::now()) {
            self.abort(id, "Task timed out").await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn add_event(&self, id: Uuid, event_type: impl Into<String>, data: Option<Value>) -> TaskResult<()> {
        let mut task = self.get_or_not_found(id).await?;
        task.add_event(TaskEvent::new(event_type, data));
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, false);
        Ok(())
    }

    pub async fn set_progress(&self, id: Uuid, pct: u8) -> TaskResult<()> {
        let mut task = self.get_or_not_found(id).await?;
        task.set_progress(pct);
        self.repo.update(&task).await.map_err(TaskError::Storage)?;
        self.broadcast(&task, false);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> TaskResult<Option<Task>> {
        self.repo.get(id).await.map_err(TaskError::Storage)
    }

    pub async fn list(&self, filter: TaskFilter) -> TaskResult<Vec<Task>> {
        self.repo.list(filter).await.map_err(TaskError::Storage)
    }

    /// Terminal tasks only; callers must check `status.is_terminal()` first
    /// if they want a precise error instead of a generic storage failure.
    pub async fn delete(&self, id: Uuid) -> TaskResult<()> {
        let task = self.get_or_not_found(id).await?;
        if !task.status.is_terminal() {
            return Err(TaskError::NotTerminal(id));
        }
        self.repo.delete(id).await.map_err(TaskError::Storage)
    }

    pub async fn cleanup_old_tasks(&self, older_than_ms: i64) -> TaskResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(older_than_ms);
        self.repo.delete_older_than(cutoff).await.map_err(TaskError::Storage)
    }

    /// Tasks left in `pending`/`running` from a previous process are not
    /// resumable — no in-process `AbortController` survives a restart, and a
    /// `running` row with no controller would hang forever. Mark each
    /// `failed` with a fixed message, bypassing `can_transition_to` the same
    /// way `save_workflow_binding` does, since this is a repair, not a
    /// protocol transition. Called once from `Agent::new` before the alarm
    /// loop starts.
    pub async fn cold_start_cleanup(&self) -> TaskResult<u64> {
        let stale = self.repo.list_pending_or_running().await.map_err(TaskError::Storage)?;
        let count = stale.len() as u64;
        for mut task in stale {
            task.mark_failed("Task was abandoned: the agent restarted while it was in progress");
            self.repo.update(&task).await.map_err(TaskError::Storage)?;
            self.broadcast(&task, true);
        }
        Ok(count)
    }

    /// Invokes a task method directly, outside the queue/retry protocol, for
    /// `POST /_execute-durable-task` (spec §4.J): the external workflow
    /// engine owns retries and persistence here, and posts the outcome back
    /// via `/_workflow-update` — this call just runs the method body once.
    pub async fn execute_durable(&self, task_id: Uuid, method: &str, input: Value) -> Result<Value, String> {
        let handler = self.methods.get(method).ok_or_else(|| format!("no task method registered for {method:?}"))?;
        let controller = AbortController::new();
        let ctx = TaskContext { task_id, signal: controller.signal(), tracker: self.self_weak() };
        handler(input, ctx).await
    }

    async fn get_or_not_found(&self, id: Uuid) -> TaskResult<Task> {
        self.repo.get(id).await.map_err(TaskError::Storage)?.ok_or(TaskError::NotFound(id))
    }

    /// Broadcasts on status changes and terminal states unconditionally;
    /// otherwise throttled to one frame per 500ms per task.
    fn broadcast(&self, task: &Task, force: bool) {
        if !force {
            let mut last = self.last_broadcast.lock().unwrap();
            if let Some(at) = last.get(&task.id) {
                if at.elapsed() < MIN_BROADCAST_INTERVAL {
                    return;
                }
            }
            last.insert(task.id, Instant::now());
        } else {
            self.last_broadcast.lock().unwrap().insert(task.id, Instant::now());
        }

        let view = serde_json::to_value(task_view(task)).unwrap_or(Value::Null);
        self.connections.broadcast(OutboundFrame::TaskUpdate { task_id: task.id, task: Some(view) }, None);

        if task.status.is_terminal() {
            self.events.emit(ObservabilityEvent::new(
                "task.terminal",
                format!("task {} reached terminal state {}", task.id, task.status.as_str()),
                serde_json::json!({ "taskId": task.id.to_string(), "status": task.status.as_str() }),
            ));
        }
    }
}

#[derive(serde::Serialize)]
struct TaskView<'a> {
    id: Uuid,
    method: &'a str,
    status: &'static str,
    result: &'a Option<Value>,
    error: &'a Option<String>,
    progress: Option<u8>,
    created_at: DateTime<Utc>,
}

fn task_view(task: &Task) -> TaskView<'_> {
    TaskView {
        id: task.id,
        method: &task.method,
        status: task.status.as_str(),
        result: &task.result,
        error: &task.error,
        progress: task.progress,
        created_at: task.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteQueueRepository, SqliteTaskRepository};
    use crate::core::agent::AgentHandle;
    use std::sync::atomic::AtomicU32;

    async fn new_tracker(methods: TaskMethodRegistry) -> Arc<TaskTracker> {
        let pool = create_migrated_test_pool().await.unwrap();
        let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let queue_repo = Arc::new(SqliteQueueRepository::new(pool));
        TaskTracker::new(task_repo, queue_repo, Arc::new(ConnectionRegistry::new()), Arc::new(EventBus::new()), Arc::new(methods), AgentHandle::for_test())
    }

    #[test]
    fn parses_plain_milliseconds_and_unit_suffixes() {
        assert_eq!(parse_timeout("1500"), Some(1500));
        assert_eq!(parse_timeout("5s"), Some(5_000));
        assert_eq!(parse_timeout("2m"), Some(120_000));
        assert_eq!(parse_timeout("5x"), None);
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let mut methods = TaskMethodRegistry::new();
        methods.register("flaky", move |_input, _ctx| {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(format!("fail {attempt}"))
                } else {
                    Ok(serde_json::json!({ "attempt": attempt }))
                }
            })
        });

        let tracker = new_tracker(methods).await;
        let id = tracker.run("flaky", Value::Null, None, 5).await.unwrap();

        let task = tracker.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_fails_after_exhausting_retries() {
        let mut methods = TaskMethodRegistry::new();
        methods.register("always-fails", |_input, _ctx| Box::pin(async move { Err("nope".to_string()) }));

        let tracker = new_tracker(methods).await;
        let id = tracker.run("always-fails", Value::Null, None, 1).await.unwrap();

        let task = tracker.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn run_with_unregistered_method_fails_the_task() {
        let tracker = new_tracker(TaskMethodRegistry::new()).await;
        let id = tracker.run("ghost", Value::Null, None, 0).await.unwrap();

        let task = tracker.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cold_start_cleanup_fails_pending_and_running_tasks() {
        let tracker = new_tracker(TaskMethodRegistry::new()).await;
        let task = tracker.create("whatever", Value::Null, None, 0).await.unwrap();

        let cleaned = tracker.cold_start_cleanup().await.unwrap();
        assert_eq!(cleaned, 1);

        let task = tracker.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn execute_durable_invokes_the_method_once_outside_the_queue() {
        let mut methods = TaskMethodRegistry::new();
        methods.register("double", |input, _ctx| {
            Box::pin(async move {
                let n = input.as_i64().unwrap_or(0);
                Ok(Value::from(n * 2))
            })
        });

        let tracker = new_tracker(methods).await;
        let result = tracker.execute_durable(Uuid::new_v4(), "double", Value::from(21)).await.unwrap();
        assert_eq!(result, Value::from(42));
    }
}
