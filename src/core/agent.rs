//! The agent itself: a named, durable instance wiring together storage, the
//! WebSocket connection pool, the queue, the scheduler, the task tracker,
//! the MCP manager, and the workflow bridge (spec §2, §5, glossary
//! "Agent").
//!
//! Everything in `core` assumes a single-threaded cooperative caller (spec
//! §5): only one callback runs at a time per agent. This module does not
//! enforce that itself — it is the embedding harness's (`server`,
//! `bin/agent-server.rs`) job to serialize calls onto one agent instance,
//! the same way the source's platform contract does.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::adapters::sqlite::{
    drop_all_tables, SqliteMcpServerRepository, SqliteQueueRepository, SqliteScheduleRepository, SqliteStateRepository,
    SqliteTaskRepository,
};
use crate::core::ambient::{with_agent_context, AmbientContext, ConnectionId};
use crate::core::callable::CallableRegistry;
use crate::core::connections::ConnectionRegistry;
use crate::core::event_bus::{EventBus, ObservabilityEvent};
use crate::core::mcp::McpManager;
use crate::core::queue::Queue;
use crate::core::rpc::{self, InboundFrame, OutboundFrame};
use crate::core::scheduler::Scheduler;
use crate::core::state_store::StateStore;
use crate::core::task_tracker::{TaskMethodRegistry, TaskTracker};
use crate::core::workflow_bridge::WorkflowBridge;
use crate::domain::errors::{AgentError, AgentResult, ScheduleResult};
use crate::domain::models::{McpTransportKind, Schedule};
use crate::domain::ports::WorkflowRuntime;
use crate::infrastructure::config::McpServerConfig;

/// Cheap-to-clone identity handed around as "which agent is this callback
/// running under" (spec §4.C). Two handles compare equal only if they're
/// clones of the same instance — the ambient-context re-entry guard relies
/// on this, not on name equality, since two distinct instances could share
/// a name during a hot-reload.
#[derive(Clone)]
pub struct AgentHandle(Arc<AgentIdentity>);

struct AgentIdentity {
    id: Uuid,
    name: String,
}

impl AgentHandle {
    fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(AgentIdentity { id: Uuid::new_v4(), name: name.into() }))
    }

    /// A handle with no backing `Agent`, for unit tests of components that
    /// only need *an* identity, not a live instance.
    pub fn for_test() -> Self {
        Self::new("test-agent")
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn same_agent(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// User-supplied hook run after the core's `onConnect` sequence (state
/// frame, MCP view frame, observability) completes (spec §4.H).
pub type OnConnectHook = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Everything the embedding application supplies at construction time: the
/// callable/task-method registries are populated before the agent exists,
/// matching "callable decorator metadata ... a registry ... populated at
/// registration time" (spec §9).
pub struct AgentConfig {
    pub name: String,
    pub pool: SqlitePool,
    pub initial_state: Option<Value>,
    pub rpc_callables: Arc<CallableRegistry>,
    pub task_methods: Arc<TaskMethodRegistry>,
    pub workflow_runtime: Option<Arc<dyn WorkflowRuntime>>,
    pub mcp_servers: Vec<McpServerConfig>,
}

pub struct Agent {
    pub handle: AgentHandle,
    pub connections: Arc<ConnectionRegistry>,
    pub events: Arc<EventBus>,
    pub state: Arc<StateStore>,
    pub queue: Arc<Queue>,
    pub scheduler: Arc<Scheduler>,
    pub tasks: Arc<TaskTracker>,
    pub mcp: Arc<McpManager>,
    pub workflow: Arc<WorkflowBridge>,
    rpc_callables: Arc<CallableRegistry>,
    pool: SqlitePool,
    destroying: Arc<AtomicBool>,
    alarm_notify: Arc<Notify>,
    on_connect_hook: RwLock<Option<OnConnectHook>>,
}

impl Agent {
    pub async fn new(config: AgentConfig) -> AgentResult<Arc<Self>> {
        let handle = AgentHandle::new(config.name.clone());
        let events = Arc::new(EventBus::new());
        let connections = Arc::new(ConnectionRegistry::new());

        let state_repo = Arc::new(SqliteStateRepository::new(config.pool.clone()));
        let state = Arc::new(StateStore::new(state_repo, connections.clone(), events.clone(), config.initial_state));

        let queue_repo = Arc::new(SqliteQueueRepository::new(config.pool.clone()));
        let queue = Arc::new(Queue::new(queue_repo, config.rpc_callables.clone(), events.clone()));

        let schedule_repo = Arc::new(SqliteScheduleRepository::new(config.pool.clone()));
        let scheduler = Arc::new(Scheduler::new(schedule_repo, config.rpc_callables.clone(), events.clone()));

        let task_repo = Arc::new(SqliteTaskRepository::new(config.pool.clone()));
        let task_queue_repo = Arc::new(SqliteQueueRepository::new(config.pool.clone()));
        let tasks = TaskTracker::new(task_repo, task_queue_repo, connections.clone(), events.clone(), config.task_methods, handle.clone());

        tasks.cold_start_cleanup().await.map_err(AgentError::from)?;

        let mcp_repo = Arc::new(SqliteMcpServerRepository::new(config.pool.clone()));
        let mcp = Arc::new(McpManager::new(mcp_repo, connections.clone(), events.clone()));
        mcp.restore_from_storage().await.map_err(AgentError::from)?;

        let workflow = Arc::new(WorkflowBridge::new(config.workflow_runtime, tasks.clone(), config.name));

        let agent = Arc::new(Self {
            handle,
            connections,
            events,
            state,
            queue,
            scheduler,
            tasks,
            mcp,
            workflow,
            rpc_callables: config.rpc_callables,
            pool: config.pool,
            destroying: Arc::new(AtomicBool::new(false)),
            alarm_notify: Arc::new(Notify::new()),
            on_connect_hook: RwLock::new(None),
        });

        for server in config.mcp_servers {
            let Some(kind) = McpTransportKind::from_str(&server.transport) else { continue };
            let callback_url = format!("/_mcp/callback/{}", server.id);
            if agent.mcp.register_server(&server.id, &server.name, &server.server_url, &callback_url).await.is_ok() {
                let _ = agent.mcp.connect_to_server(&server.id, kind, None).await;
            }
        }

        agent.spawn_alarm_loop();
        Ok(agent)
    }

    pub async fn set_on_connect_hook(&self, hook: OnConnectHook) {
        *self.on_connect_hook.write().await = Some(hook);
    }

    /// Register a new WebSocket connection and run `onConnect`: state
    /// snapshot, then MCP view, then observability, then the user hook, in
    /// that order (spec §4.H).
    pub async fn accept_connection(self: &Arc<Self>) -> AgentResult<(ConnectionId, tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>)> {
        let (id, rx) = self.connections.register();

        let state = self.state.get().await?;
        self.connections.send_to(id, OutboundFrame::State { state });

        let mcp_view = self.mcp.aggregate_view().await;
        self.connections.send_to(id, OutboundFrame::McpServers { servers: mcp_view });

        self.events.emit(ObservabilityEvent::new(
            "agent.connect",
            format!("connection {} established", id.0),
            serde_json::json!({ "connectionId": id.0.to_string() }),
        ));

        if let Some(hook) = self.on_connect_hook.read().await.as_ref() {
            hook(id);
        }

        Ok((id, rx))
    }

    pub fn drop_connection(&self, id: ConnectionId) {
        self.connections.unregister(id);
    }

    /// Parse and dispatch one inbound WebSocket text frame (spec §4.H).
    /// Unrecognized tags are not modeled here — the embedding server layer
    /// is expected to forward `InboundFrame::Other` to its own message
    /// hook before calling this, or handle it in its own match.
    pub async fn handle_inbound(self: &Arc<Self>, connection: ConnectionId, raw: &str) {
        let frame = match rpc::parse_inbound(raw) {
            Ok(frame) => frame,
            Err(err) => {
                self.connections.send_to(connection, OutboundFrame::rpc_error(String::new(), err.to_string()));
                return;
            }
        };

        match frame {
            InboundFrame::Rpc { id, method, args } => match self.rpc_callables.get(&method) {
                Ok(handler) => {
                    let ctx = AmbientContext::new(self.handle.clone()).with_connection(connection);
                    let connections = self.connections.clone();
                    with_agent_context(ctx, rpc::dispatch(id, handler, args, move |frame| connections.send_to(connection, frame))).await;
                }
                Err(err) => {
                    self.connections.send_to(connection, OutboundFrame::rpc_error(id, err.to_string()));
                }
            },
            InboundFrame::StateUpdate { state } => {
                let _ = self.state.set(state, Some(connection)).await;
            }
            InboundFrame::Other(_) => {}
        }
    }

    pub async fn schedule_at(&self, callback: &str, payload: Value, at: chrono::DateTime<Utc>) -> ScheduleResult<Schedule> {
        let schedule = self.scheduler.schedule_at(callback, payload, at).await?;
        self.alarm_notify.notify_waiters();
        Ok(schedule)
    }

    pub async fn schedule_after(&self, callback: &str, payload: Value, delay_secs: i64) -> ScheduleResult<Schedule> {
        let schedule = self.scheduler.schedule_after(callback, payload, delay_secs).await?;
        self.alarm_notify.notify_waiters();
        Ok(schedule)
    }

    pub async fn schedule_cron(&self, callback: &str, payload: Value, cron_expr: &str) -> ScheduleResult<Schedule> {
        let schedule = self.scheduler.schedule_cron(callback, payload, cron_expr).await?;
        self.alarm_notify.notify_waiters();
        Ok(schedule)
    }

    pub async fn cancel_schedule(&self, id: Uuid) -> ScheduleResult<bool> {
        let existed = self.scheduler.cancel(id).await?;
        self.alarm_notify.notify_waiters();
        Ok(existed)
    }

    /// Drives the single persistent alarm: wait for the earliest scheduled
    /// `time`, fire every due row, repeat. A schedule mutation wakes the
    /// loop early via `alarm_notify` rather than waiting out a stale sleep.
    fn spawn_alarm_loop(self: &Arc<Self>) {
        let agent = self.clone();
        tokio::spawn(async move {
            loop {
                if agent.destroying.load(Ordering::Acquire) {
                    break;
                }

                let next = agent.scheduler.next_alarm_at().await.ok().flatten();
                match next {
                    Some(at) => {
                        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = agent.alarm_notify.notified() => continue,
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = pending::<()>() => {}
                            _ = agent.alarm_notify.notified() => continue,
                        }
                    }
                }

                if agent.destroying.load(Ordering::Acquire) {
                    break;
                }

                let handle = agent.handle.clone();
                let _ = agent.scheduler.fire_due(Utc::now(), move || AmbientContext::new(handle.clone())).await;
            }
        });
    }

    /// Disposes everything the agent owns: cancels the alarm loop, drops
    /// every `cf_agents_*` table, and marks the instance unusable (spec §5
    /// "Resource policy").
    pub async fn destroy(&self) -> AgentResult<()> {
        self.destroying.store(true, Ordering::Release);
        self.alarm_notify.notify_waiters();

        self.events.emit(ObservabilityEvent::new(
            "agent.destroy",
            format!("agent {} destroyed", self.handle.name()),
            serde_json::json!({}),
        ));

        drop_all_tables(&self.pool).await.map_err(|e| AgentError::Storage(crate::domain::errors::StorageError::Query(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_handles_are_not_the_same_agent() {
        let a = AgentHandle::for_test();
        let b = AgentHandle::for_test();
        assert!(!a.same_agent(&b));
        assert!(a.same_agent(&a.clone()));
    }
}
