//! Domain models: pure entities with no infrastructure concerns.
//!
//! Every persistent entity in §3 of the runtime's data model lives here as
//! a plain struct/enum; `adapters::sqlite` maps these to and from rows.

pub mod mcp;
pub mod queue_item;
pub mod schedule;
pub mod state;
pub mod task;

pub use mcp::{McpConnectionState, McpConnectionView, McpResourceSummary, McpServerRecord, McpToolSummary, McpTransportKind};
pub use queue_item::QueueItem;
pub use schedule::{Schedule, ScheduleKind};
pub use state::AgentState;
pub use task::{Task, TaskEvent, TaskStatus};
