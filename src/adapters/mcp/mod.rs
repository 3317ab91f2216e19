//! Outbound MCP wire layer, built on `rmcp` (spec §1, §4.I).

pub mod connection;

pub use connection::{pending_authorization, McpTransport, RmcpConnection};
