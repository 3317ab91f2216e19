//! Optional dispatch to a durable workflow engine (spec §4.J).
//!
//! `run_durable` only succeeds when a [`WorkflowRuntime`] binding is
//! configured; otherwise the task fails immediately with a fixed message
//! rather than silently falling back to an in-process run (spec §7
//! "Workflow binding missing").

use std::sync::Arc;

use uuid::Uuid;

use crate::core::task_tracker::TaskTracker;
use crate::domain::errors::{TaskError, TaskResult};
use crate::domain::ports::{WorkflowRunStatus, WorkflowRuntime, WorkflowStartParams};

pub struct WorkflowBridge {
    runtime: Option<Arc<dyn WorkflowRuntime>>,
    tasks: Arc<TaskTracker>,
    agent_name: String,
    agent_binding: String,
}

impl WorkflowBridge {
    pub fn new(runtime: Option<Arc<dyn WorkflowRuntime>>, tasks: Arc<TaskTracker>, agent_name: impl Into<String>) -> Self {
        let agent_name = agent_name.into();
        let agent_binding = kebab_case(&agent_name);
        Self { runtime, tasks, agent_name, agent_binding }
    }

    /// Create the task record, start a workflow instance, and persist the
    /// `{instance_id, binding}` pair onto the task.
    pub async fn run_durable(&self, method: &str, input: serde_json::Value, timeout_ms: Option<u64>, retries: u32) -> TaskResult<Uuid> {
        let Some(runtime) = &self.runtime else {
            return Err(TaskError::WorkflowBindingMissing);
        };
        let Some(binding) = runtime.binding_name() else {
            return Err(TaskError::WorkflowBindingMissing);
        };

        let task = self.tasks.create(method, input.clone(), timeout_ms, retries).await?;

        let params = WorkflowStartParams {
            task_id: task.id,
            agent_binding: self.agent_binding.clone(),
            agent_name: self.agent_name.clone(),
            method_name: method.to_string(),
            input,
            timeout_ms,
            retries,
        };

        match runtime.start(params).await {
            Ok(instance_id) => {
                self.attach_instance(task.id, &instance_id, binding).await?;
                Ok(task.id)
            }
            Err(err) => {
                let _ = self.tasks.fail(task.id, err.to_string()).await;
                Err(TaskError::Workflow(err))
            }
        }
    }

    async fn attach_instance(&self, task_id: Uuid, instance_id: &str, binding: &str) -> TaskResult<()> {
        let mut task = self.tasks.get(task_id).await?.ok_or(TaskError::NotFound(task_id))?;
        task.workflow_instance_id = Some(instance_id.to_string());
        task.workflow_binding = Some(binding.to_string());
        self.tasks.save_workflow_binding(task).await
    }

    /// Validates and applies a `POST /_workflow-update` body.
    pub async fn apply_workflow_update(&self, update: WorkflowUpdate) -> TaskResult<()> {
        if let Some(progress) = update.progress {
            if progress > 100 {
                return Err(TaskError::InvalidTransition { from: "n/a".into(), to: "invalid progress".into() });
            }
            self.tasks.set_progress(update.task_id, progress).await?;
        }
        if let Some(event) = update.event {
            self.tasks.add_event(update.task_id, event, None).await?;
        }
        match (update.status.as_deref(), update.result, update.error) {
            (Some("completed"), result, _) => {
                self.tasks.complete(update.task_id, result.unwrap_or(serde_json::Value::Null)).await?;
            }
            (Some("failed"), _, error) => {
                self.tasks.fail(update.task_id, error.unwrap_or_else(|| "workflow reported failure".into())).await?;
            }
            (Some(other), _, _) if !other.is_empty() => {
                return Err(TaskError::InvalidTransition { from: "n/a".into(), to: other.to_string() });
            }
            _ => {}
        }
        Ok(())
    }

    /// `cancelWorkflow(taskId)`: terminate the linked workflow instance.
    /// Failure modes are returned as a `CancelOutcome`, never as an `Err` —
    /// per spec §4.J these are business outcomes, not protocol errors.
    pub async fn cancel_workflow(&self, task_id: Uuid) -> TaskResult<CancelOutcome> {
        let task = self.tasks.get(task_id).await?.ok_or(TaskError::NotFound(task_id))?;

        let Some(instance_id) = task.workflow_instance_id.clone() else {
            return Ok(CancelOutcome::failure("binding_not_found"));
        };
        let Some(runtime) = &self.runtime else {
            return Ok(CancelOutcome::failure("binding_not_found"));
        };

        match runtime.status(&instance_id).await {
            Ok(WorkflowRunStatus::Complete) => return Ok(CancelOutcome::failure("already_complete")),
            Ok(WorkflowRunStatus::Errored) => return Ok(CancelOutcome::failure("already_errored")),
            Ok(WorkflowRunStatus::Terminated) => return Ok(CancelOutcome::failure("already_terminated")),
            Ok(WorkflowRunStatus::Running) => {}
            Err(err) => return Ok(CancelOutcome::failure(err.to_string())),
        }

        match runtime.terminate(&instance_id).await {
            Ok(()) => {
                self.tasks.abort(task_id, "cancelled via workflow termination").await?;
                Ok(CancelOutcome::success())
            }
            Err(err) => Ok(CancelOutcome::failure(err.to_string())),
        }
    }
}

/// Body of `POST /_workflow-update`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WorkflowUpdate {
    #[serde(rename = "taskId")]
    pub task_id: Uuid,
    pub event: Option<String>,
    pub progress: Option<u8>,
    pub status: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// The `{success, reason?}` shape `cancelWorkflow` returns.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CancelOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelOutcome {
    fn success() -> Self {
        Self { success: true, reason: None }
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self { success: false, reason: Some(reason.into()) }
    }
}

/// `"MyAgentClass"` -> `"my-agent-class"`, matching the source's
/// `_agentBinding` kebab-case requirement.
fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('-');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_splits_on_uppercase() {
        assert_eq!(kebab_case("MyAgentClass"), "my-agent-class");
        assert_eq!(kebab_case("agent"), "agent");
    }
}
