//! Lazily materializes one [`Agent`] per `(class, instance name)` pair
//! (spec §6 "Routing").
//!
//! The crate has no concrete durable-object host (spec §1 non-goal), so
//! there is no platform API to resolve a named instance against. This is
//! the harness's stand-in: a single agent *class* served by one process,
//! with instances created on first access and kept alive for the process
//! lifetime, each backed by its own SQLite file.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::agent::{Agent, AgentConfig};
use crate::domain::errors::AgentResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Builds an [`AgentConfig`] for a newly-addressed instance name. Supplied
/// once at harness startup; called at most once per distinct instance name
/// for the life of the process.
pub type AgentFactory = Arc<dyn Fn(String) -> BoxFuture<'static, AgentResult<AgentConfig>> + Send + Sync>;

/// Holds every live instance of one agent class, addressed by name.
pub struct AgentRegistry {
    class_name: String,
    factory: AgentFactory,
    instances: RwLock<HashMap<String, Arc<Agent>>>,
}

impl AgentRegistry {
    pub fn new(class_name: impl Into<String>, factory: AgentFactory) -> Self {
        Self { class_name: class_name.into(), factory, instances: RwLock::new(HashMap::new()) }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the existing instance named `name`, constructing it on first
    /// access. Concurrent first-accesses race to construct; the loser's
    /// result is discarded in favor of whichever finished first, matching
    /// the read-then-double-checked-write pattern used elsewhere for
    /// lazily-initialized shared state in this crate.
    pub async fn get_or_create(&self, name: &str) -> AgentResult<Arc<Agent>> {
        if let Some(agent) = self.instances.read().await.get(name) {
            return Ok(agent.clone());
        }

        let config = (self.factory)(name.to_string()).await?;
        let agent = Agent::new(config).await?;

        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(name) {
            return Ok(existing.clone());
        }
        instances.insert(name.to_string(), agent.clone());
        Ok(agent)
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::core::callable::CallableRegistry;
    use crate::core::task_tracker::TaskMethodRegistry;

    async fn test_config(name: String) -> AgentResult<AgentConfig> {
        Ok(AgentConfig {
            name,
            pool: create_migrated_test_pool().await.unwrap(),
            initial_state: None,
            rpc_callables: Arc::new(CallableRegistry::new()),
            task_methods: Arc::new(TaskMethodRegistry::new()),
            workflow_runtime: None,
            mcp_servers: Vec::new(),
        })
    }

    #[tokio::test]
    async fn same_name_returns_same_instance() {
        let registry = AgentRegistry::new("example-agent", Arc::new(|name| Box::pin(test_config(name))));

        let a = registry.get_or_create("alice").await.unwrap();
        let b = registry.get_or_create("alice").await.unwrap();
        assert!(a.handle.same_agent(&b.handle));
        assert_eq!(registry.instance_count().await, 1);
    }

    #[tokio::test]
    async fn distinct_names_are_distinct_instances() {
        let registry = AgentRegistry::new("example-agent", Arc::new(|name| Box::pin(test_config(name))));

        let a = registry.get_or_create("alice").await.unwrap();
        let b = registry.get_or_create("bob").await.unwrap();
        assert!(!a.handle.same_agent(&b.handle));
        assert_eq!(registry.instance_count().await, 2);
    }
}
