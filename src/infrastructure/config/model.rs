//! Typed configuration for the agent runtime harness (spec §6 "Environment
//! expectations", SPEC_FULL §B.3).

use serde::{Deserialize, Serialize};

use crate::infrastructure::logging::LogConfig;

/// Top-level configuration, assembled by [`super::loader::ConfigLoader`]
/// from programmatic defaults, an optional `agent.yaml`, then
/// `AGENT_`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRuntimeConfig {
    /// Routing prefix agents are addressed under: `"{prefix}/{class}/{name}"`.
    #[serde(default = "default_routing_prefix")]
    pub routing_prefix: String,

    /// Storage configuration (one embedded SQLite store per agent instance).
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Structured logging configuration.
    #[serde(default)]
    pub logging: LogConfig,

    /// Name of the durable-workflow environment binding, if the host
    /// platform provides one. Absent ⇒ `runDurable` always fails tasks with
    /// the fixed "binding not configured" error (spec §4.J).
    #[serde(default)]
    pub durable_tasks_workflow: Option<String>,

    /// MCP servers to auto-register at agent startup.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// HTTP/WebSocket listener configuration for the harness binary.
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            routing_prefix: default_routing_prefix(),
            database: DatabaseConfig::default(),
            logging: LogConfig::default(),
            durable_tasks_workflow: None,
            mcp_servers: Vec::new(),
            listener: ListenerConfig::default(),
        }
    }
}

fn default_routing_prefix() -> String {
    "agents".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path(), max_connections: default_max_connections() }
    }
}

fn default_database_path() -> String {
    "sqlite://./data/agent.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// A server to register via `McpClientManager::register_server` on startup,
/// the Rust-native stand-in for "environment expectations: named
/// namespaces ... optional DURABLE_TASKS_WORKFLOW ... binding" (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    pub server_url: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    #[serde(default)]
    pub oauth_client_secret: Option<String>,
}

fn default_transport() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), enable_cors: default_true() }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_true() -> bool {
    true
}
