use serde_json::json;
use stepline_core::{
    AgentEvent, AgentState, AgentStatus, StreamChunk, StreamEventType, ToolCallPayload,
};
use tracing::debug;

use super::{ExecutorContext, ExecutorOutput, RuntimeExecutors};
use crate::error::RuntimeResult;

impl RuntimeExecutors {
    /// Pause the operation until someone approves or rejects the calls
    pub(super) async fn request_human_approve(
        &self,
        ctx: &ExecutorContext,
        pending_tools_calling: Vec<ToolCallPayload>,
        state: &AgentState,
    ) -> RuntimeResult<ExecutorOutput> {
        debug!(
            "{} Requesting approval for {} tool call(s)",
            ctx.log_prefix("request_human_approve"),
            pending_tools_calling.len()
        );

        self.publish(
            ctx,
            StreamEventType::StepStart,
            json!({
                "pendingToolsCalling": pending_tools_calling,
                "phase": "human_approval",
                "requiresApproval": true,
            }),
        )
        .await?;

        let mut new_state = state.clone().with_status(AgentStatus::WaitingForHuman);
        new_state.pending_tools_calling = Some(pending_tools_calling.clone());
        new_state.usage.human_interaction.approval_requests += 1;
        new_state.touch();

        self.publisher
            .publish_stream_chunk(
                &ctx.operation_id,
                ctx.step_index,
                &StreamChunk::pending_tools(&pending_tools_calling),
            )
            .await?;

        Ok(ExecutorOutput {
            events: vec![
                AgentEvent::HumanApproveRequired {
                    operation_id: new_state.operation_id.clone(),
                    pending_tools_calling: pending_tools_calling.clone(),
                },
                AgentEvent::ToolPending {
                    tool_calls: pending_tools_calling,
                },
            ],
            new_state,
            next_context: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use stepline_core::{EventPublisher, StreamChunkType};

    use super::*;
    use crate::testing::{ScriptedModelRuntime, TestHarness};

    #[tokio::test]
    async fn approval_request_pauses_with_pending_calls() {
        let harness = TestHarness::new(ScriptedModelRuntime::new());
        let ctx = ExecutorContext::new("op-1", 1);
        let pending = vec![ToolCallPayload::new("c1", "web-browsing", "crawl", "{}")];
        let state = AgentState::new("op-1").with_status(AgentStatus::Running);

        let out = harness
            .executors
            .request_human_approve(&ctx, pending.clone(), &state)
            .await
            .unwrap();

        assert_eq!(out.new_state.status, AgentStatus::WaitingForHuman);
        assert_eq!(out.new_state.pending_tools_calling, Some(pending.clone()));
        assert_eq!(out.new_state.usage.human_interaction.approval_requests, 1);
        assert!(out.next_context.is_none());
        let kinds: Vec<&str> = out.events.iter().map(AgentEvent::kind).collect();
        assert_eq!(kinds, vec!["human_approve_required", "tool_pending"]);

        let mut published = harness
            .publisher
            .get_stream_history("op-1", 10)
            .await
            .unwrap();
        published.reverse();
        assert_eq!(published[0].event_type, StreamEventType::StepStart);
        assert_eq!(published[0].data["requiresApproval"], true);
        let chunk: StreamChunk = serde_json::from_value(published[1].data.clone()).unwrap();
        assert_eq!(chunk.chunk_type, StreamChunkType::ToolsCalling);
    }
}
