//! Domain layer: persistent entities, repository ports, and error types.
//!
//! Nothing here touches `sqlx`, `axum`, or `rmcp` directly — those live in
//! `adapters`. This module describes *what* the runtime's data looks like
//! and *which* operations a storage/transport backend must support.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    AgentError, AgentResult, McpError, McpResult, QueueError, QueueResult, RpcError, RpcResult,
    ScheduleError, ScheduleResult, StorageError, StorageResult, TaskError, TaskResult,
    WorkflowBridgeError,
};
