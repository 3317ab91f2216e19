//! External durable-workflow collaborator port (spec §1 "out of scope:
//! Cloudflare Workflows integration ... we specify only the contract the
//! task router needs", §4.J).
//!
//! The concrete durable-object/workflow host is an external system; this
//! crate only needs to start an instance, poll its status, and terminate
//! it. `core::workflow_bridge` is the only consumer.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::WorkflowBridgeError;

/// The parameters a workflow instance is started with, mirroring the
/// source's `{_taskId, _agentBinding, _agentName, _methodName, _input,
/// _timeout, _retry}` envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowStartParams {
    #[serde(rename = "_taskId")]
    pub task_id: uuid::Uuid,
    #[serde(rename = "_agentBinding")]
    pub agent_binding: String,
    #[serde(rename = "_agentName")]
    pub agent_name: String,
    #[serde(rename = "_methodName")]
    pub method_name: String,
    #[serde(rename = "_input")]
    pub input: Value,
    #[serde(rename = "_timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(rename = "_retry")]
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowRunStatus {
    Running,
    Complete,
    Errored,
    Terminated,
}

#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    /// The configured binding name (e.g. `"DURABLE_TASKS_WORKFLOW"`), or
    /// `None` if no durable backend is wired up.
    fn binding_name(&self) -> Option<&str>;

    async fn start(&self, params: WorkflowStartParams) -> Result<String, WorkflowBridgeError>;

    async fn status(&self, instance_id: &str) -> Result<WorkflowRunStatus, WorkflowBridgeError>;

    async fn terminate(&self, instance_id: &str) -> Result<(), WorkflowBridgeError>;
}
