//! State store capability trait

use async_trait::async_trait;

use crate::{
    error::StoreResult,
    metadata::{CreateOperationParams, OperationMetadata, OperationStats},
    state::AgentState,
    step::{EventBatch, StepRecord, StepResult},
};

/// Persistence for agent state snapshots, step history and operation metadata
///
/// Implemented identically by the Redis-backed and in-memory stores so either
/// can be plugged into the coordinator.
///
/// # Example
///
/// ```rust,no_run
/// use stepline_core::{AgentState, StateStore, StoreResult};
///
/// async fn bump(store: &dyn StateStore, op: &str) -> StoreResult<()> {
///     if let Some(mut state) = store.load_agent_state(op).await? {
///         state.step_count += 1;
///         store.save_agent_state(op, &state).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Register a new operation with status `idle` and zero totals
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the metadata record cannot be written
    async fn create_operation_metadata(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> StoreResult<()>;

    /// Overwrite the latest snapshot
    ///
    /// Also refreshes the operation metadata. A metadata failure is logged and
    /// does not fail the save.
    async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> StoreResult<()>;

    /// Load an owned copy of the latest snapshot
    ///
    /// The returned value never aliases stored data.
    async fn load_agent_state(&self, operation_id: &str) -> StoreResult<Option<AgentState>>;

    /// Persist state, step record, events and metadata as one unit
    async fn save_step_result(&self, operation_id: &str, result: &StepResult) -> StoreResult<()>;

    /// Up to `limit` most recent step records, oldest-first
    async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StepRecord>>;

    /// Up to `limit` most recent event batches, oldest-first
    async fn get_step_events(&self, operation_id: &str, limit: usize)
    -> StoreResult<Vec<EventBatch>>;

    async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> StoreResult<Option<OperationMetadata>>;

    /// Ids of every operation still retained by the store
    async fn get_active_operations(&self) -> StoreResult<Vec<String>>;

    /// Counts bucketed by status
    async fn get_stats(&self) -> StoreResult<OperationStats>;

    /// Remove every record kept for the operation
    async fn delete_agent_operation(&self, operation_id: &str) -> StoreResult<()>;

    /// Remove operations inactive beyond the TTL; returns how many were removed
    async fn cleanup_expired_operations(&self) -> StoreResult<usize>;

    async fn disconnect(&self) -> StoreResult<()>;

    /// Short backend name for logs (`redis`, `memory`)
    fn backend(&self) -> &'static str;
}
