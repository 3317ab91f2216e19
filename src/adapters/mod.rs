//! Adapters for external systems: persistence (`sqlite`) and the outbound
//! MCP wire protocol (`mcp`, built on `rmcp`'s `Transport`/`Client`
//! abstractions — spec §1 names the MCP wire SDK an external collaborator).

pub mod mcp;
pub mod sqlite;
