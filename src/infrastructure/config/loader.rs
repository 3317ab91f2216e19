//! Hierarchical configuration loading (spec §6 "Environment expectations",
//! SPEC_FULL §B.3): programmatic defaults, then an optional `agent.yaml`,
//! then `AGENT_`-prefixed environment variables, validated eagerly.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::model::AgentRuntimeConfig;

/// Configuration error types. Every field-level problem gets its own
/// variant so call sites can report a specific reason rather than a
/// generic "invalid config" message.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("routing_prefix cannot be empty")]
    EmptyRoutingPrefix,

    #[error("mcp server at index {0} has an empty id")]
    EmptyMcpServerId(usize),

    #[error("mcp server {0:?} has an empty server_url")]
    EmptyMcpServerUrl(String),

    #[error("mcp server {0:?} has an unknown transport {1:?}; must be one of: auto, streamable-http, sse")]
    InvalidMcpTransport(String, String),

    #[error("listener port cannot be 0")]
    InvalidListenerPort,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`Serialized`)
    /// 2. `agent.yaml` in the current directory
    /// 3. `AGENT_`-prefixed environment variables (highest priority)
    pub fn load() -> Result<AgentRuntimeConfig> {
        let config: AgentRuntimeConfig = Figment::new()
            .merge(Serialized::defaults(AgentRuntimeConfig::default()))
            .merge(Yaml::file("agent.yaml"))
            .merge(Env::prefixed("AGENT_").split("__"))
            .extract()
            .context("failed to extract agent runtime configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, skipping environment lookup
    /// — used by tests and by the harness's `--config` flag.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<AgentRuntimeConfig> {
        let config: AgentRuntimeConfig = Figment::new()
            .merge(Serialized::defaults(AgentRuntimeConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &AgentRuntimeConfig) -> Result<(), ConfigError> {
        if config.routing_prefix.is_empty() {
            return Err(ConfigError::EmptyRoutingPrefix);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        for (i, server) in config.mcp_servers.iter().enumerate() {
            if server.id.is_empty() {
                return Err(ConfigError::EmptyMcpServerId(i));
            }
            if server.server_url.is_empty() {
                return Err(ConfigError::EmptyMcpServerUrl(server.id.clone()));
            }
            if !["auto", "streamable-http", "sse"].contains(&server.transport.as_str()) {
                return Err(ConfigError::InvalidMcpTransport(server.id.clone(), server.transport.clone()));
            }
        }

        if config.listener.port == 0 {
            return Err(ConfigError::InvalidListenerPort);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AgentRuntimeConfig::default();
        assert_eq!(config.routing_prefix, "agents");
        assert_eq!(config.database.max_connections, 5);
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_parsing_overrides_defaults() {
        let yaml = r#"
routing_prefix: custom-agents
database:
  path: "sqlite://./custom.db"
  max_connections: 10
logging:
  level: debug
  format: pretty
durable_tasks_workflow: DURABLE_TASKS_WORKFLOW
mcp_servers:
  - id: srv1
    name: example
    server_url: "https://example.com/mcp"
    transport: sse
"#;
        let config: AgentRuntimeConfig = Figment::new()
            .merge(Serialized::defaults(AgentRuntimeConfig::default()))
            .merge(figment::providers::Yaml::string(yaml))
            .extract()
            .unwrap();

        assert_eq!(config.routing_prefix, "custom-agents");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.durable_tasks_workflow.as_deref(), Some("DURABLE_TASKS_WORKFLOW"));
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(config.mcp_servers[0].transport, "sse");
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn rejects_unknown_transport() {
        let mut config = AgentRuntimeConfig::default();
        config.mcp_servers.push(super::super::model::McpServerConfig {
            id: "srv1".into(),
            name: "example".into(),
            server_url: "https://example.com".into(),
            transport: "carrier-pigeon".into(),
            oauth_client_id: None,
            oauth_client_secret: None,
        });

        let result = ConfigLoader::validate(&config);
        assert!(matches!(result, Err(ConfigError::InvalidMcpTransport(_, _))));
    }

    #[test]
    fn rejects_empty_routing_prefix() {
        let mut config = AgentRuntimeConfig::default();
        config.routing_prefix = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyRoutingPrefix)));
    }

    #[test]
    fn env_override_precedence() {
        unsafe {
            std::env::set_var("AGENT_ROUTING_PREFIX", "env-agents");
        }
        let config: AgentRuntimeConfig = Figment::new()
            .merge(Serialized::defaults(AgentRuntimeConfig::default()))
            .merge(Env::prefixed("AGENT_").split("__"))
            .extract()
            .unwrap();
        assert_eq!(config.routing_prefix, "env-agents");
        unsafe {
            std::env::remove_var("AGENT_ROUTING_PREFIX");
        }
    }
}
