use serde_json::json;
use stepline_core::{AgentEvent, AgentState, AgentStatus, StreamEventType};
use tracing::debug;

use super::{ExecutorContext, ExecutorOutput, RuntimeExecutors};
use crate::error::RuntimeResult;

impl RuntimeExecutors {
    pub(super) async fn finish(
        &self,
        ctx: &ExecutorContext,
        reason: String,
        reason_detail: Option<String>,
        state: &AgentState,
    ) -> RuntimeResult<ExecutorOutput> {
        debug!("{} Finishing execution ({reason})", ctx.log_prefix("finish"));

        let mut new_state = state.clone().with_status(AgentStatus::Done);
        new_state.touch();

        self.publish(
            ctx,
            StreamEventType::StepComplete,
            json!({
                "finalState": new_state,
                "phase": "execution_complete",
                "reason": reason,
                "reasonDetail": reason_detail,
            }),
        )
        .await?;

        Ok(ExecutorOutput {
            events: vec![AgentEvent::Done {
                final_state: Box::new(new_state.clone()),
                reason,
                reason_detail,
            }],
            new_state,
            next_context: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use stepline_core::EventPublisher;

    use super::*;
    use crate::testing::{ScriptedModelRuntime, TestHarness};

    #[tokio::test]
    async fn finish_marks_done_and_announces() {
        let harness = TestHarness::new(ScriptedModelRuntime::new());
        let ctx = ExecutorContext::new("op-1", 3);
        let state = AgentState::new("op-1").with_status(AgentStatus::Running);

        let out = harness
            .executors
            .finish(&ctx, "completed".into(), None, &state)
            .await
            .unwrap();

        assert_eq!(out.new_state.status, AgentStatus::Done);
        assert!(out.new_state.last_modified >= state.last_modified);
        assert!(out.next_context.is_none());
        match out.events.as_slice() {
            [AgentEvent::Done {
                reason,
                final_state,
                ..
            }] => {
                assert_eq!(reason, "completed");
                assert_eq!(final_state.status, AgentStatus::Done);
            }
            other => panic!("unexpected events {other:?}"),
        }

        let published = harness
            .publisher
            .get_stream_history("op-1", 10)
            .await
            .unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, StreamEventType::StepComplete);
        assert_eq!(published[0].step_index, 3);
        assert_eq!(published[0].data["finalState"]["status"], "done");
        assert_eq!(published[0].data["reason"], "completed");
    }
}
