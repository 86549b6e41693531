//! Runtime coordinator
//!
//! Pairs one [`StateStore`] with one [`EventPublisher`] and adds the two
//! lifecycle announcements subscribers rely on: `agent_runtime_init` when an
//! operation is created and `agent_runtime_end` on the first save that moves
//! an operation into `done`.

use std::sync::Arc;

use stepline_core::{
    AgentState, AgentStatus, CreateOperationParams, EventBatch, EventPublisher, OperationMetadata,
    OperationStats, StateStore, StepRecord, StepResult, StreamEvent,
};
use stepline_store::{BackendConfig, Backends};
use tracing::{debug, error, warn};

use crate::error::RuntimeResult;

#[derive(Clone)]
pub struct AgentRuntimeCoordinator {
    state_store: Arc<dyn StateStore>,
    event_publisher: Arc<dyn EventPublisher>,
}

impl AgentRuntimeCoordinator {
    pub fn new(state_store: Arc<dyn StateStore>, event_publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            state_store,
            event_publisher,
        }
    }

    pub fn from_backends(backends: Backends) -> Self {
        Self::new(backends.state_store, backends.event_publisher)
    }

    /// Redis when the process-wide provider reaches it, in-memory otherwise
    #[cfg(feature = "redis")]
    pub async fn from_environment() -> Self {
        let provider = stepline_store::RedisClientProvider::global();
        let backends =
            stepline_store::create_backends(provider, &BackendConfig::from_env_or_default()).await;
        Self::from_backends(backends)
    }

    #[cfg(not(feature = "redis"))]
    pub async fn from_environment() -> Self {
        Self::from_backends(stepline_store::memory_backends(
            &BackendConfig::from_env_or_default(),
        ))
    }

    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.state_store
    }

    pub fn event_publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.event_publisher
    }

    /// Register an operation and announce it with the stored metadata
    ///
    /// The init event carries the record as read back from the store. If no
    /// record can be read, the event is skipped.
    pub async fn create_agent_operation(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> RuntimeResult<()> {
        self.state_store
            .create_operation_metadata(operation_id, params)
            .await?;

        match self.state_store.get_operation_metadata(operation_id).await? {
            Some(metadata) => {
                self.event_publisher
                    .publish_agent_runtime_init(operation_id, &metadata)
                    .await?;
                debug!(operation_id, "Created agent operation");
            }
            None => {
                warn!(operation_id, "Operation metadata not readable after create, skipping init event");
            }
        }
        Ok(())
    }

    /// Persist `state`, announcing completion on the first transition into `done`
    pub async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> RuntimeResult<()> {
        let previous = self.previous_status(operation_id).await?;
        self.state_store.save_agent_state(operation_id, state).await?;

        if entered_done(previous, state.status) {
            self.announce_end(operation_id, state.step_count, state, None, None)
                .await;
        }
        Ok(())
    }

    /// Persist a step atomically, announcing completion on the first transition into `done`
    pub async fn save_step_result(&self, operation_id: &str, result: &StepResult) -> RuntimeResult<()> {
        let previous = self.previous_status(operation_id).await?;
        self.state_store.save_step_result(operation_id, result).await?;

        if entered_done(previous, result.status()) {
            let (reason, detail) = result.done_reason().unzip();
            self.announce_end(
                operation_id,
                result.step_index,
                &result.new_state,
                reason,
                detail.flatten(),
            )
            .await;
        }
        Ok(())
    }

    async fn previous_status(&self, operation_id: &str) -> RuntimeResult<Option<AgentStatus>> {
        Ok(self
            .state_store
            .load_agent_state(operation_id)
            .await?
            .map(|state| state.status))
    }

    async fn announce_end(
        &self,
        operation_id: &str,
        step_index: u32,
        final_state: &AgentState,
        reason: Option<&str>,
        reason_detail: Option<&str>,
    ) {
        match self
            .event_publisher
            .publish_agent_runtime_end(operation_id, step_index, final_state, reason, reason_detail)
            .await
        {
            Ok(_) => debug!(operation_id, step_index, "Published agent runtime end"),
            Err(e) => error!(operation_id, error = %e, "Failed to publish agent runtime end"),
        }
    }

    pub async fn load_agent_state(&self, operation_id: &str) -> RuntimeResult<Option<AgentState>> {
        Ok(self.state_store.load_agent_state(operation_id).await?)
    }

    pub async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> RuntimeResult<Option<OperationMetadata>> {
        Ok(self.state_store.get_operation_metadata(operation_id).await?)
    }

    pub async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> RuntimeResult<Vec<StepRecord>> {
        Ok(self
            .state_store
            .get_execution_history(operation_id, limit)
            .await?)
    }

    pub async fn get_step_events(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> RuntimeResult<Vec<EventBatch>> {
        Ok(self.state_store.get_step_events(operation_id, limit).await?)
    }

    /// Most recent stream events, newest-first
    pub async fn get_stream_history(
        &self,
        operation_id: &str,
        count: usize,
    ) -> RuntimeResult<Vec<StreamEvent>> {
        Ok(self
            .event_publisher
            .get_stream_history(operation_id, count)
            .await?)
    }

    pub async fn get_active_operations(&self) -> RuntimeResult<Vec<String>> {
        Ok(self.state_store.get_active_operations().await?)
    }

    pub async fn get_stats(&self) -> RuntimeResult<OperationStats> {
        Ok(self.state_store.get_stats().await?)
    }

    pub async fn cleanup_expired_operations(&self) -> RuntimeResult<usize> {
        Ok(self.state_store.cleanup_expired_operations().await?)
    }

    /// Remove an operation from both the store and the event log
    ///
    /// Both deletions always run; the first failure is returned.
    pub async fn delete_agent_operation(&self, operation_id: &str) -> RuntimeResult<()> {
        let (state, stream) = tokio::join!(
            self.state_store.delete_agent_operation(operation_id),
            self.event_publisher.cleanup_operation(operation_id),
        );
        if let Err(e) = &state {
            error!(operation_id, error = %e, "Failed to delete operation state");
        }
        if let Err(e) = &stream {
            error!(operation_id, error = %e, "Failed to delete operation stream");
        }
        state?;
        stream?;
        debug!(operation_id, "Deleted agent operation");
        Ok(())
    }

    pub async fn disconnect(&self) -> RuntimeResult<()> {
        let (state, stream) = tokio::join!(
            self.state_store.disconnect(),
            self.event_publisher.disconnect(),
        );
        state?;
        stream?;
        Ok(())
    }
}

fn entered_done(previous: Option<AgentStatus>, current: AgentStatus) -> bool {
    current == AgentStatus::Done && previous != Some(AgentStatus::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepline_core::{AgentEvent, StreamEventType};
    use stepline_store::{InMemoryEventPublisher, InMemoryStateStore};

    fn coordinator() -> AgentRuntimeCoordinator {
        AgentRuntimeCoordinator::new(
            Arc::new(InMemoryStateStore::default()),
            Arc::new(InMemoryEventPublisher::default()),
        )
    }

    async fn count(coordinator: &AgentRuntimeCoordinator, event_type: StreamEventType) -> usize {
        coordinator
            .get_stream_history("op-1", 100)
            .await
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    #[tokio::test]
    async fn init_event_carries_stored_metadata() {
        let coordinator = coordinator();
        coordinator
            .create_agent_operation("op-1", CreateOperationParams::for_user("u1"))
            .await
            .unwrap();

        let events = coordinator.get_stream_history("op-1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, StreamEventType::AgentRuntimeInit);
        let initial = &events[0].data["initialState"];
        assert_eq!(initial["status"], "idle");
        assert_eq!(initial["totalSteps"], 0);
        assert_eq!(initial["userId"], "u1");
    }

    #[tokio::test]
    async fn end_event_fires_once_across_repeated_saves() {
        let coordinator = coordinator();
        let running = AgentState::new("op-1").with_status(AgentStatus::Running);
        coordinator.save_agent_state("op-1", &running).await.unwrap();
        assert_eq!(count(&coordinator, StreamEventType::AgentRuntimeEnd).await, 0);

        let done = running.clone().with_status(AgentStatus::Done);
        coordinator.save_agent_state("op-1", &done).await.unwrap();
        coordinator.save_agent_state("op-1", &done).await.unwrap();

        let result = StepResult {
            new_state: done.clone(),
            step_index: 3,
            execution_time_ms: 1,
            events: vec![],
            next_context: None,
        };
        coordinator.save_step_result("op-1", &result).await.unwrap();

        assert_eq!(count(&coordinator, StreamEventType::AgentRuntimeEnd).await, 1);
    }

    #[tokio::test]
    async fn step_result_end_event_uses_done_reason() {
        let coordinator = coordinator();
        let state = AgentState::new("op-1").with_status(AgentStatus::Running);
        coordinator.save_agent_state("op-1", &state).await.unwrap();

        let done = state.with_status(AgentStatus::Done);
        let result = StepResult {
            new_state: done.clone(),
            step_index: 4,
            execution_time_ms: 2,
            events: vec![AgentEvent::Done {
                final_state: Box::new(done),
                reason: "max_steps".into(),
                reason_detail: Some("limit reached".into()),
            }],
            next_context: None,
        };
        coordinator.save_step_result("op-1", &result).await.unwrap();

        let events = coordinator.get_stream_history("op-1", 1).await.unwrap();
        assert_eq!(events[0].event_type, StreamEventType::AgentRuntimeEnd);
        assert_eq!(events[0].step_index, 4);
        assert_eq!(events[0].data["reason"], "max_steps");
        assert_eq!(events[0].data["reasonDetail"], "limit reached");
    }

    #[tokio::test]
    async fn delete_clears_store_and_stream() {
        let coordinator = coordinator();
        coordinator
            .create_agent_operation("op-1", CreateOperationParams::default())
            .await
            .unwrap();
        coordinator.delete_agent_operation("op-1").await.unwrap();

        assert!(coordinator.get_operation_metadata("op-1").await.unwrap().is_none());
        assert!(coordinator.get_stream_history("op-1", 10).await.unwrap().is_empty());
    }
}
