//! Instruction executors
//!
//! Each executor takes the current state by reference and returns a new
//! state value together with the events it produced and, when the planner
//! has something to continue with, the next context. Dispatch is a match
//! over [`AgentInstruction`], so adding a variant forces a new arm here.

mod call_llm;
mod call_tool;
mod finish;
mod human_approve;
mod resolve_aborted;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use stepline_core::{
    AgentEvent, AgentInstruction, AgentState, EventPublisher, NewStreamEvent, NextContext,
    StreamEventType,
};
use tracing::{debug, error};

use crate::collaborators::{MessageModel, ModelRuntime, ToolExecutionService, ToolPricing};
use crate::config::DEFAULT_BUFFER_INTERVAL;
use crate::error::RuntimeResult;

pub use resolve_aborted::{ABORTED_TOOL_CONTENT, USER_ABORTED_REASON};

/// Identifies the step an executor runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorContext {
    pub operation_id: String,
    pub step_index: u32,
    pub user_id: Option<String>,
}

impl ExecutorContext {
    pub fn new(operation_id: impl Into<String>, step_index: u32) -> Self {
        Self {
            operation_id: operation_id.into(),
            step_index,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// `[op:step][phase]` prefix used in executor logs
    fn log_prefix(&self, phase: &str) -> String {
        format!("[{}:{}][{}]", self.operation_id, self.step_index, phase)
    }
}

/// What one executor run produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOutput {
    pub events: Vec<AgentEvent>,
    pub new_state: AgentState,
    pub next_context: Option<NextContext>,
}

/// The five executors sharing one set of collaborators
#[derive(Clone)]
pub struct RuntimeExecutors {
    publisher: Arc<dyn EventPublisher>,
    messages: Arc<dyn MessageModel>,
    tools: Arc<dyn ToolExecutionService>,
    models: Arc<dyn ModelRuntime>,
    pricing: Arc<dyn ToolPricing>,
    buffer_interval: Duration,
}

impl RuntimeExecutors {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        messages: Arc<dyn MessageModel>,
        tools: Arc<dyn ToolExecutionService>,
        models: Arc<dyn ModelRuntime>,
        pricing: Arc<dyn ToolPricing>,
    ) -> Self {
        Self {
            publisher,
            messages,
            tools,
            models,
            pricing,
            buffer_interval: DEFAULT_BUFFER_INTERVAL,
        }
    }

    pub fn with_buffer_interval(mut self, interval: Duration) -> Self {
        self.buffer_interval = interval;
        self
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Run `instruction` against `state`
    ///
    /// # Errors
    ///
    /// LLM failures and failed event publishes are returned; tool failures are
    /// reported inside the output instead.
    pub async fn execute(
        &self,
        ctx: &ExecutorContext,
        instruction: AgentInstruction,
        state: &AgentState,
    ) -> RuntimeResult<ExecutorOutput> {
        debug!(
            operation_id = %ctx.operation_id,
            step_index = ctx.step_index,
            instruction = instruction.kind(),
            "Dispatching instruction"
        );
        match instruction {
            AgentInstruction::CallLlm { payload } => self.call_llm(ctx, payload, state).await,
            AgentInstruction::CallTool {
                payload,
                parent_message_id,
            } => self.call_tool(ctx, payload, parent_message_id, state).await,
            AgentInstruction::Finish {
                reason,
                reason_detail,
            } => self.finish(ctx, reason, reason_detail, state).await,
            AgentInstruction::RequestHumanApprove {
                pending_tools_calling,
                ..
            } => {
                self.request_human_approve(ctx, pending_tools_calling, state)
                    .await
            }
            AgentInstruction::ResolveAbortedTools {
                tool_calls,
                parent_message_id,
            } => {
                self.resolve_aborted_tools(ctx, tool_calls, parent_message_id, state)
                    .await
            }
        }
    }

    async fn publish(
        &self,
        ctx: &ExecutorContext,
        event_type: StreamEventType,
        data: Value,
    ) -> RuntimeResult<()> {
        self.publisher
            .publish_stream_event(
                &ctx.operation_id,
                NewStreamEvent::new(event_type, ctx.step_index, data),
            )
            .await?;
        Ok(())
    }

    /// Publish an `error` event; a failure here is only logged
    async fn publish_error(&self, ctx: &ExecutorContext, phase: &str, message: &str) {
        let data = json!({ "error": message, "phase": phase });
        if let Err(e) = self.publish(ctx, StreamEventType::Error, data).await {
            error!(
                operation_id = %ctx.operation_id,
                step_index = ctx.step_index,
                error = %e,
                "Failed to publish error event"
            );
        }
    }
}

/// Mark a context as describing the step that is about to be recorded
fn running_context(mut context: NextContext, state: &AgentState) -> NextContext {
    context.session.status = stepline_core::AgentStatus::Running;
    context.session.step_count = state.step_count + 1;
    context
}
