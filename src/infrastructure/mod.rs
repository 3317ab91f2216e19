//! Ambient engineering stack: configuration loading and structured logging.
//! Persistence and MCP transport live in `adapters`; runtime business logic
//! lives in `core`.

pub mod config;
pub mod logging;
