//! Event publisher capability trait

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    error::StoreResult,
    metadata::OperationMetadata,
    state::AgentState,
    stream::{NewStreamEvent, StreamChunk, StreamCursor, StreamEvent, StreamEventType},
};

/// Ordered, bounded per-operation event log with tail and range reads
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Append an event and return its assigned stream id
    async fn publish_stream_event(
        &self,
        operation_id: &str,
        event: NewStreamEvent,
    ) -> StoreResult<String>;

    /// Append a `stream_chunk` event for incremental LLM output
    async fn publish_stream_chunk(
        &self,
        operation_id: &str,
        step_index: u32,
        chunk: &StreamChunk,
    ) -> StoreResult<String> {
        let data = serde_json::to_value(chunk)?;
        self.publish_stream_event(
            operation_id,
            NewStreamEvent::new(StreamEventType::StreamChunk, step_index, data),
        )
        .await
    }

    /// Announce a newly created operation
    async fn publish_agent_runtime_init(
        &self,
        operation_id: &str,
        initial_state: &OperationMetadata,
    ) -> StoreResult<String> {
        let data = json!({ "initialState": initial_state });
        self.publish_stream_event(
            operation_id,
            NewStreamEvent::new(StreamEventType::AgentRuntimeInit, 0, data),
        )
        .await
    }

    /// Announce that the operation reached `done`
    async fn publish_agent_runtime_end(
        &self,
        operation_id: &str,
        step_index: u32,
        final_state: &AgentState,
        reason: Option<&str>,
        reason_detail: Option<&str>,
    ) -> StoreResult<String> {
        let data = json!({
            "finalState": final_state,
            "operationId": operation_id,
            "phase": "execution_complete",
            "reason": reason.unwrap_or("completed"),
            "reasonDetail": reason_detail.unwrap_or("Agent runtime completed successfully"),
        });
        self.publish_stream_event(
            operation_id,
            NewStreamEvent::new(StreamEventType::AgentRuntimeEnd, step_index, data),
        )
        .await
    }

    /// Tail the log until `cancel` fires
    ///
    /// `on_events` receives each non-empty batch in append order. Transient read
    /// errors are retried with bounded backoff; the loop returns
    /// `StoreError::ReadRetriesExhausted` once the retry budget is spent and
    /// `Ok(())` when cancelled.
    async fn subscribe_stream_events(
        &self,
        operation_id: &str,
        from: StreamCursor,
        on_events: &mut (dyn FnMut(Vec<StreamEvent>) + Send),
        cancel: CancellationToken,
    ) -> StoreResult<()>;

    /// Most recent `count` events, newest-first
    async fn get_stream_history(
        &self,
        operation_id: &str,
        count: usize,
    ) -> StoreResult<Vec<StreamEvent>>;

    /// Drop the operation's stream
    async fn cleanup_operation(&self, operation_id: &str) -> StoreResult<()>;

    /// Number of operations with a live stream
    async fn get_active_operations_count(&self) -> StoreResult<usize>;

    async fn disconnect(&self) -> StoreResult<()>;

    fn backend(&self) -> &'static str;
}
