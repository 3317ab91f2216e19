//! State store port (spec §3 "State", §4.D).

use async_trait::async_trait;

use crate::domain::errors::StorageResult;
use crate::domain::models::AgentState;

/// The single-slot typed state table. There is never more than one row.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Lazily materialize the row: returns `None` if it has never been read
    /// or written.
    async fn get(&self) -> StorageResult<Option<AgentState>>;

    /// Persist both the value and the "ever written" flag.
    async fn set(&self, state: &AgentState) -> StorageResult<()>;

    /// Drop the row entirely (agent destroy).
    async fn clear(&self) -> StorageResult<()>;
}
