//! Shared fixtures for the integration tests under `tests/`.

use std::sync::Arc;

use serde_json::Value;
use statefield::adapters::sqlite::create_migrated_test_pool;
use statefield::core::agent::{Agent, AgentConfig};
use statefield::core::callable::CallableRegistry;
use statefield::core::task_tracker::TaskMethodRegistry;

/// Builds a live [`Agent`] backed by an in-memory, fully-migrated SQLite
/// pool, with no registered callables/task methods and no MCP servers —
/// callers add what their scenario needs before calling this, or mutate
/// the registries beforehand and pass them in.
#[allow(dead_code)]
pub async fn test_agent(name: &str, rpc_callables: CallableRegistry, task_methods: TaskMethodRegistry) -> Arc<Agent> {
    let config = AgentConfig {
        name: name.to_string(),
        pool: create_migrated_test_pool().await.expect("migrated test pool"),
        initial_state: Some(Value::Null),
        rpc_callables: Arc::new(rpc_callables),
        task_methods: Arc::new(task_methods),
        workflow_runtime: None,
        mcp_servers: Vec::new(),
    };
    Agent::new(config).await.expect("agent construction")
}
