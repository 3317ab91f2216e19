//! Per-component error enums and the crate-wide umbrella that wraps them.
//!
//! Each runtime component owns its own `thiserror` enum so call sites can
//! match on precise failure modes; `AgentError` exists only for the handful
//! of places (top-level dispatch, the `on_error` hook) that need one type.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the storage facade (`core::storage`, `adapters::sqlite`).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("row not found")]
    NotFound,
}

/// Errors raised by the FIFO queue (`core::queue`).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("callback method {0:?} is not registered")]
    UnknownCallback(String),

    #[error("queue item {0} not found")]
    ItemNotFound(Uuid),
}

/// Errors raised by the scheduler (`core::scheduler`).
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid cron expression {0:?}: {1}")]
    InvalidCron(String, String),

    #[error("schedule {0} not found")]
    NotFound(Uuid),

    #[error("callback method {0:?} is not registered")]
    UnknownCallback(String),
}

/// Errors raised by the task tracker (`core::task_tracker`).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("task {0} is not terminal; delete requires a terminal status")]
    NotTerminal(Uuid),

    #[error("durable workflow binding is not configured")]
    WorkflowBindingMissing,

    #[error(transparent)]
    Workflow(#[from] WorkflowBridgeError),
}

/// Errors raised by the RPC / client-sync plane (`core::rpc`).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("method {0:?} is not callable")]
    NotCallable(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Errors raised by the MCP client manager (`adapters::mcp`).
#[derive(Debug, Error)]
pub enum McpError {
    #[error("server {0} not found")]
    ServerNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized; authorization required")]
    Unauthorized,

    #[error("capability discovery failed: {0}")]
    Discovery(String),

    #[error("oauth error: {0}")]
    OAuth(String),

    #[error("no matching callback for request path {0:?}")]
    NoMatchingCallback(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by the external-task (durable workflow) bridge
/// (`core::workflow_bridge`).
#[derive(Debug, Error)]
pub enum WorkflowBridgeError {
    #[error("DURABLE_TASKS_WORKFLOW binding is not configured")]
    BindingMissing,

    #[error("workflow instance {0} already {1}")]
    AlreadyTerminal(String, String),

    #[error("workflow instance not found for task {0}")]
    InstanceNotFound(Uuid),

    #[error("workflow dispatch failed: {0}")]
    Dispatch(String),
}

/// Crate-wide umbrella error. Used only at call sites that genuinely need a
/// single type: the agent's top-level request dispatcher and the
/// `on_error` hook.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Workflow(#[from] WorkflowBridgeError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type QueueResult<T> = Result<T, QueueError>;
pub type ScheduleResult<T> = Result<T, ScheduleError>;
pub type TaskResult<T> = Result<T, TaskError>;
pub type RpcResult<T> = Result<T, RpcError>;
pub type McpResult<T> = Result<T, McpError>;
pub type AgentResult<T> = Result<T, AgentError>;
