//! Instructions a planner can emit for one step

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{MessageToolCall, StateMessage, ToolCallPayload};

/// Input for a single LLM call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLlmPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub messages: Vec<StateMessage>,
    #[serde(default)]
    pub tools: Vec<Value>,
    /// Reuse an assistant message created ahead of time instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

/// Closed set of step kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentInstruction {
    CallLlm {
        payload: CallLlmPayload,
    },
    CallTool {
        payload: ToolCallPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    Finish {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_detail: Option<String>,
    },
    RequestHumanApprove {
        pending_tools_calling: Vec<ToolCallPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    ResolveAbortedTools {
        tool_calls: Vec<MessageToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
}

impl AgentInstruction {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentInstruction::CallLlm { .. } => "call_llm",
            AgentInstruction::CallTool { .. } => "call_tool",
            AgentInstruction::Finish { .. } => "finish",
            AgentInstruction::RequestHumanApprove { .. } => "request_human_approve",
            AgentInstruction::ResolveAbortedTools { .. } => "resolve_aborted_tools",
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        AgentInstruction::Finish {
            reason: reason.into(),
            reason_detail: None,
        }
    }
}
