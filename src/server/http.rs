//! The three non-WebSocket request shapes an agent answers directly (spec
//! §6 "HTTP surface"): the workflow status callback, the durable-task
//! execution callback, and MCP OAuth redirects. Everything else falls
//! through to the embedding application's own routes (spec §6 "All other
//! requests -> user `onRequest`"), which this harness does not model.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::mcp::McpCallbackOutcome;
use crate::core::workflow_bridge::WorkflowUpdate;
use crate::domain::errors::TaskError;
use crate::server::ServerState;

async fn resolve_agent(
    state: &Arc<ServerState>,
    class: &str,
    name: &str,
) -> Result<Arc<crate::core::agent::Agent>, (StatusCode, String)> {
    if class != state.registry.class_name() {
        return Err((StatusCode::NOT_FOUND, format!("unknown agent class {class:?}")));
    }
    state.registry.get_or_create(name).await.map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

/// `POST /{prefix}/:class/:name/_workflow-update` (spec §4.J, §6):
/// `200 "ok"` | `400 "<error>"` | `500 "error"`.
pub async fn workflow_update(
    State(state): State<Arc<ServerState>>,
    Path((class, name)): Path<(String, String)>,
    body: String,
) -> impl IntoResponse {
    let agent = match resolve_agent(&state, &class, &name).await {
        Ok(agent) => agent,
        Err((status, message)) => return (status, message),
    };

    let update: WorkflowUpdate = match serde_json::from_str(&body) {
        Ok(update) => update,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()),
    };

    match agent.workflow.apply_workflow_update(update).await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(err @ (TaskError::NotFound(_) | TaskError::InvalidTransition { .. })) => (StatusCode::BAD_REQUEST, err.to_string()),
        Err(err) => {
            tracing::error!(%err, "workflow update failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "error".to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteDurableTaskRequest {
    #[serde(rename = "taskId")]
    task_id: Option<Uuid>,
    #[serde(rename = "methodName")]
    method_name: Option<String>,
    #[serde(default)]
    input: Value,
}

/// `POST /{prefix}/:class/:name/_execute-durable-task` (spec §4.J, §6):
/// `200 {...result}` | `400 "Missing taskId or methodName"` | `500 {error}`.
pub async fn execute_durable_task(
    State(state): State<Arc<ServerState>>,
    Path((class, name)): Path<(String, String)>,
    Json(req): Json<ExecuteDurableTaskRequest>,
) -> impl IntoResponse {
    let agent = match resolve_agent(&state, &class, &name).await {
        Ok(agent) => agent,
        Err((status, message)) => return (status, Json(serde_json::json!({ "error": message }))).into_response(),
    };

    let (Some(task_id), Some(method_name)) = (req.task_id, req.method_name) else {
        return (StatusCode::BAD_REQUEST, "Missing taskId or methodName").into_response();
    };

    match agent.tasks.execute_durable(task_id, &method_name, req.input).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": error }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct McpCallbackParams {
    code: Option<String>,
    error: Option<String>,
    #[allow(dead_code)]
    state: Option<String>,
}

/// Any path matching a persisted MCP callback URL (spec §4.I, §6): consumed
/// for OAuth code exchange, redirecting to the bare origin on completion
/// either way — the authorization outcome lives in the `cf_agent_mcp_servers`
/// frame fanned out to connected clients, not in this response body.
pub async fn mcp_callback(
    State(state): State<Arc<ServerState>>,
    Path((class, name, server_id)): Path<(String, String, String)>,
    Query(params): Query<McpCallbackParams>,
) -> impl IntoResponse {
    let agent = match resolve_agent(&state, &class, &name).await {
        Ok(agent) => agent,
        Err((status, message)) => return (status, message).into_response(),
    };

    let path = format!("/_mcp/callback/{server_id}");
    match agent.mcp.handle_callback_request(&path, params.code.as_deref(), params.error.as_deref()).await {
        McpCallbackOutcome::Success => Redirect::to("/").into_response(),
        McpCallbackOutcome::Error(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
        McpCallbackOutcome::NotFound => (StatusCode::NOT_FOUND, "no matching MCP callback".to_string()).into_response(),
    }
}
