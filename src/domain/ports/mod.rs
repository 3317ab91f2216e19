//! Repository ports (interfaces) the core depends on. `adapters::sqlite`
//! provides the only implementation; tests may supply in-memory doubles
//! against these same traits.

pub mod mcp_repository;
pub mod queue_repository;
pub mod schedule_repository;
pub mod state_repository;
pub mod task_repository;
pub mod workflow_runtime;

pub use mcp_repository::McpServerRepository;
pub use queue_repository::QueueRepository;
pub use schedule_repository::ScheduleRepository;
pub use state_repository::StateRepository;
pub use task_repository::{TaskFilter, TaskRepository};
pub use workflow_runtime::{WorkflowRunStatus, WorkflowRuntime, WorkflowStartParams};
