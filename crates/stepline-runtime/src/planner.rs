//! Deciding the next instruction from the last step's context

use async_trait::async_trait;
use serde_json::Value;
use stepline_core::{AgentInstruction, AgentState, CallLlmPayload, ContextPayload, NextContext};

use crate::error::RuntimeResult;
use crate::tool_name::ToolNameResolver;

/// Reason carried by `finish` when the model answered without tool calls
pub const COMPLETED_REASON: &str = "completed";

/// Chooses what an operation does next
#[async_trait]
pub trait AgentPlanner: Send + Sync {
    async fn next_instruction(
        &self,
        state: &AgentState,
        context: Option<&NextContext>,
    ) -> RuntimeResult<AgentInstruction>;
}

/// Alternates model calls and tool calls until the model stops asking for tools
///
/// - user input, or no context: `call_llm` over the transcript
/// - LLM result with tool calls: `request_human_approve` when approval is
///   required, otherwise `call_tool` for the first call
/// - tool result or approval: the next unanswered call, or `call_llm`
/// - LLM result without tool calls: `finish`
#[derive(Debug, Clone, Default)]
pub struct ToolLoopPlanner {
    tools: Vec<Value>,
    require_approval: bool,
}

impl ToolLoopPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool definitions offered to the model on every call
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_approval(mut self, require_approval: bool) -> Self {
        self.require_approval = require_approval;
        self
    }

    fn call_llm(&self, state: &AgentState, parent_message_id: Option<String>) -> AgentInstruction {
        AgentInstruction::CallLlm {
            payload: CallLlmPayload {
                messages: state.messages.clone(),
                tools: self.tools.clone(),
                parent_message_id,
                ..Default::default()
            },
        }
    }

    fn next_tool_or_llm(&self, state: &AgentState, parent: Option<&str>) -> AgentInstruction {
        let unanswered = state.unanswered_tool_calls();
        match unanswered.first() {
            Some(call) => AgentInstruction::CallTool {
                payload: ToolNameResolver::resolve_one(call, &state.tool_manifest_map),
                parent_message_id: parent.map(str::to_string),
            },
            None => self.call_llm(state, parent.map(str::to_string)),
        }
    }
}

#[async_trait]
impl AgentPlanner for ToolLoopPlanner {
    async fn next_instruction(
        &self,
        state: &AgentState,
        context: Option<&NextContext>,
    ) -> RuntimeResult<AgentInstruction> {
        let Some(context) = context else {
            return Ok(self.call_llm(state, None));
        };

        let instruction = match &context.payload {
            ContextPayload::UserInput { .. } => self.call_llm(state, None),
            ContextPayload::LlmResult {
                tools_calling,
                parent_message_id,
                ..
            } => match tools_calling.first() {
                None => AgentInstruction::finish(COMPLETED_REASON),
                Some(_) if self.require_approval => AgentInstruction::RequestHumanApprove {
                    pending_tools_calling: tools_calling.clone(),
                    parent_message_id: parent_message_id.clone(),
                },
                Some(first) => AgentInstruction::CallTool {
                    payload: first.clone(),
                    parent_message_id: parent_message_id.clone(),
                },
            },
            ContextPayload::ToolResult { .. } | ContextPayload::HumanApprovedTool { .. } => {
                self.next_tool_or_llm(state, context.payload.parent_message_id())
            }
        };
        Ok(instruction)
    }
}
