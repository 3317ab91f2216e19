//! The agent runtime itself (spec §2, §4, §5).
//!
//! Everything here assumes a single-threaded cooperative caller per agent
//! instance — see [`agent`]'s module doc for what that means for locking.

pub mod agent;
pub mod ambient;
pub mod callable;
pub mod connections;
pub mod disposable;
pub mod event_bus;
pub mod mcp;
pub mod queue;
pub mod rpc;
pub mod scheduler;
pub mod state_store;
pub mod task_tracker;
pub mod workflow_bridge;
