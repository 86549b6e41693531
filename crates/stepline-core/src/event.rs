//! Typed facts produced while executing a step

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{AgentState, MessageToolCall, ToolCallPayload};
use crate::usage::ModelUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmChunkKind {
    Text,
    Reasoning,
}

/// One flushed slice of LLM output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmChunk {
    #[serde(rename = "type")]
    pub kind: LlmChunkKind,
    pub text: String,
}

/// Aggregate of a fully drained LLM stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCallResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<MessageToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
}

/// What the tool-execution service reported back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub content: String,
    pub success: bool,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// Append-only record of something that happened during a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    LlmStream {
        chunk: LlmChunk,
    },
    LlmResult {
        result: LlmCallResult,
    },
    ToolResult {
        id: String,
        result: ToolExecutionResult,
    },
    ToolPending {
        tool_calls: Vec<ToolCallPayload>,
    },
    HumanApproveRequired {
        operation_id: String,
        pending_tools_calling: Vec<ToolCallPayload>,
    },
    Done {
        final_state: Box<AgentState>,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_detail: Option<String>,
    },
    Error {
        error: String,
        phase: String,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::LlmStream { .. } => "llm_stream",
            AgentEvent::LlmResult { .. } => "llm_result",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::ToolPending { .. } => "tool_pending",
            AgentEvent::HumanApproveRequired { .. } => "human_approve_required",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Error { .. } => "error",
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        AgentEvent::LlmStream {
            chunk: LlmChunk {
                kind: LlmChunkKind::Text,
                text: text.into(),
            },
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        AgentEvent::LlmStream {
            chunk: LlmChunk {
                kind: LlmChunkKind::Reasoning,
                text: text.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_value(AgentEvent::text("Hi")).unwrap();
        assert_eq!(json["type"], "llm_stream");
        assert_eq!(json["chunk"]["type"], "text");
        assert_eq!(json["chunk"]["text"], "Hi");

        let json = serde_json::to_value(AgentEvent::HumanApproveRequired {
            operation_id: "op-1".into(),
            pending_tools_calling: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "human_approve_required");
        assert_eq!(json["operationId"], "op-1");
        assert!(json["pendingToolsCalling"].is_array());
    }

    #[test]
    fn tool_result_uses_execution_time_key() {
        let event = AgentEvent::ToolResult {
            id: "call_1".into(),
            result: ToolExecutionResult {
                content: "ok".into(),
                success: true,
                execution_time_ms: 42,
                error: None,
                state: None,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["result"]["executionTime"], 42);
        let back: AgentEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), "tool_result");
    }
}
