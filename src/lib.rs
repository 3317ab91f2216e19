//! Runtime core for long-lived, single-addressable stateful agents.
//!
//! An agent is a named, durable object with an embedded SQL store, a pool
//! of WebSocket clients, a scheduler, a queue, a task tracker, and a
//! manager of outbound MCP client sessions. This crate implements that
//! core in isolation from any concrete durable-object host: `core::Agent`
//! is driven by whatever request router the embedding binary provides
//! (see `server` and `bin/agent-server.rs` for the reference harness).
//!
//! Module map:
//! - [`domain`] — persistent entities, repository ports, error taxonomy.
//! - [`adapters`] — SQLite repositories and the `rmcp`-backed MCP client.
//! - [`core`] — the agent runtime itself: ambient context, state store,
//!   queue, scheduler, task tracker, RPC/client-sync plane, MCP manager,
//!   and the durable-workflow bridge.
//! - [`server`] — the axum WebSocket/HTTP surface described in spec §6.
//! - [`infrastructure`] — configuration loading and structured logging.

pub mod adapters;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod server;

pub use core::agent::{Agent, AgentHandle};
pub use domain::errors::{AgentError, AgentResult};
pub use infrastructure::config::AgentRuntimeConfig;
