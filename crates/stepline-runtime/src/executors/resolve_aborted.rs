use serde_json::json;
use stepline_core::{
    AgentEvent, AgentState, AgentStatus, MessageToolCall, StateMessage, StreamEventType,
};
use tracing::{debug, warn};

use super::{ExecutorContext, ExecutorOutput, RuntimeExecutors};
use crate::collaborators::NewMessage;
use crate::error::RuntimeResult;
use crate::tool_name::ToolNameResolver;

pub const ABORTED_TOOL_CONTENT: &str = "Tool execution was aborted by user.";
pub const USER_ABORTED_REASON: &str = "user_aborted";

impl RuntimeExecutors {
    /// Close out cancelled tool calls so the transcript stays consistent
    pub(super) async fn resolve_aborted_tools(
        &self,
        ctx: &ExecutorContext,
        tool_calls: Vec<MessageToolCall>,
        parent_message_id: Option<String>,
        state: &AgentState,
    ) -> RuntimeResult<ExecutorOutput> {
        debug!(
            "{} Resolving {} aborted tool call(s)",
            ctx.log_prefix("resolve_aborted_tools"),
            tool_calls.len()
        );

        let mut new_state = state.clone();
        for payload in ToolNameResolver::resolve(&tool_calls, &state.tool_manifest_map) {
            let message = NewMessage {
                plugin_intervention: Some(json!({ "status": "aborted" })),
                ..NewMessage::tool(&state.metadata, &payload, ABORTED_TOOL_CONTENT)
            }
            .with_parent(parent_message_id.clone());
            if let Err(e) = self.messages.create(message).await {
                warn!(
                    operation_id = %ctx.operation_id,
                    tool_call_id = %payload.id,
                    error = %e,
                    "Failed to create aborted tool message"
                );
            }
            new_state
                .messages
                .push(StateMessage::tool(&payload.id, ABORTED_TOOL_CONTENT));
        }

        new_state.status = AgentStatus::Done;
        new_state.pending_tools_calling = None;
        new_state.touch();

        let reason_detail = "User aborted operation with pending tool calls".to_string();
        self.publish(
            ctx,
            StreamEventType::StepComplete,
            json!({
                "finalState": new_state,
                "phase": "execution_complete",
                "reason": USER_ABORTED_REASON,
                "reasonDetail": reason_detail,
            }),
        )
        .await?;

        Ok(ExecutorOutput {
            events: vec![AgentEvent::Done {
                final_state: Box::new(new_state.clone()),
                reason: USER_ABORTED_REASON.to_string(),
                reason_detail: Some(reason_detail),
            }],
            new_state,
            next_context: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use stepline_core::MessageRole;

    use super::*;
    use crate::testing::{ScriptedModelRuntime, TestHarness};

    #[tokio::test]
    async fn each_aborted_call_gets_a_marked_tool_message() {
        let harness = TestHarness::new(ScriptedModelRuntime::new());
        let ctx = ExecutorContext::new("op-1", 4);
        let calls = vec![
            MessageToolCall::new("c1", "web-browsing____search", "{}"),
            MessageToolCall::new("c2", "web-browsing____crawl", "{}"),
        ];
        let state = AgentState::new("op-1")
            .with_status(AgentStatus::WaitingForHuman)
            .with_messages(vec![StateMessage::assistant("", calls.clone())]);

        let out = harness
            .executors
            .resolve_aborted_tools(&ctx, calls, Some("msg_9".into()), &state)
            .await
            .unwrap();

        let created = harness.messages.created();
        assert_eq!(created.len(), 2);
        for message in &created {
            assert_eq!(message.role, MessageRole::Tool);
            assert_eq!(message.content, ABORTED_TOOL_CONTENT);
            assert_eq!(message.plugin_intervention, Some(json!({ "status": "aborted" })));
            assert_eq!(message.parent_id.as_deref(), Some("msg_9"));
        }

        assert_eq!(out.new_state.status, AgentStatus::Done);
        assert!(out.new_state.unanswered_tool_calls().is_empty());
        assert_eq!(out.new_state.messages.len(), 3);
        assert!(matches!(
            out.events.as_slice(),
            [AgentEvent::Done { reason, .. }] if reason == USER_ABORTED_REASON
        ));
    }
}
