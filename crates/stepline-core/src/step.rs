//! Step results, planner context and the records kept in execution history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::AgentEvent;
use crate::state::{AgentState, AgentStatus, MessageToolCall, ToolCallPayload};

/// Snapshot of the session the planner sees next to its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub operation_id: String,
    pub message_count: usize,
    pub event_count: usize,
    pub status: AgentStatus,
    pub step_count: u32,
}

impl SessionContext {
    pub fn of(state: &AgentState, event_count: usize) -> Self {
        Self {
            operation_id: state.operation_id.clone(),
            message_count: state.messages.len(),
            event_count,
            status: state.status,
            step_count: state.step_count,
        }
    }
}

/// Phase-tagged payload describing what just happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContextPayload {
    UserInput {
        message: String,
    },
    LlmResult {
        has_tools_calling: bool,
        content: String,
        #[serde(default)]
        tool_calls: Vec<MessageToolCall>,
        #[serde(default)]
        tools_calling: Vec<ToolCallPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    ToolResult {
        tool_call_id: String,
        tool_call: ToolCallPayload,
        data: Value,
        execution_time_ms: u64,
        is_success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    HumanApprovedTool {
        approved: Vec<ToolCallPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
}

impl ContextPayload {
    pub fn phase(&self) -> &'static str {
        match self {
            ContextPayload::UserInput { .. } => "user_input",
            ContextPayload::LlmResult { .. } => "llm_result",
            ContextPayload::ToolResult { .. } => "tool_result",
            ContextPayload::HumanApprovedTool { .. } => "human_approved_tool",
        }
    }

    pub fn parent_message_id(&self) -> Option<&str> {
        match self {
            ContextPayload::UserInput { .. } => None,
            ContextPayload::LlmResult {
                parent_message_id, ..
            }
            | ContextPayload::ToolResult {
                parent_message_id, ..
            }
            | ContextPayload::HumanApprovedTool {
                parent_message_id, ..
            } => parent_message_id.as_deref(),
        }
    }
}

/// Seed for the planner's next decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextContext {
    pub payload: ContextPayload,
    pub session: SessionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_usage: Option<Value>,
}

impl NextContext {
    pub fn new(payload: ContextPayload, state: &AgentState, event_count: usize) -> Self {
        Self {
            payload,
            session: SessionContext::of(state, event_count),
            step_usage: None,
        }
    }

    pub fn user_input(message: impl Into<String>, state: &AgentState) -> Self {
        Self::new(
            ContextPayload::UserInput {
                message: message.into(),
            },
            state,
            0,
        )
    }
}

/// Output of one instruction execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub new_state: AgentState,
    pub step_index: u32,
    pub execution_time_ms: u64,
    pub events: Vec<AgentEvent>,
    pub next_context: Option<NextContext>,
}

impl StepResult {
    pub fn status(&self) -> AgentStatus {
        self.new_state.status
    }

    /// Reason carried by the step's `done` event, if any
    pub fn done_reason(&self) -> Option<(&str, Option<&str>)> {
        self.events.iter().rev().find_map(|e| match e {
            AgentEvent::Done {
                reason,
                reason_detail,
                ..
            } => Some((reason.as_str(), reason_detail.as_deref())),
            _ => None,
        })
    }
}

/// Entry of the bounded step-history log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_index: u32,
    pub status: AgentStatus,
    pub step_count: u32,
    pub execution_time_ms: u64,
    pub event_count: usize,
    pub total_cost: f64,
    pub has_next_context: bool,
    pub recorded_at: DateTime<Utc>,
}

impl From<&StepResult> for StepRecord {
    fn from(result: &StepResult) -> Self {
        Self {
            step_index: result.step_index,
            status: result.new_state.status,
            step_count: result.new_state.step_count,
            execution_time_ms: result.execution_time_ms,
            event_count: result.events.len(),
            total_cost: result.new_state.cost.total,
            has_next_context: result.next_context.is_some(),
            recorded_at: Utc::now(),
        }
    }
}

/// Entry of the bounded events log: all events of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub step_index: u32,
    pub events: Vec<AgentEvent>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&StepResult> for EventBatch {
    fn from(result: &StepResult) -> Self {
        Self {
            step_index: result.step_index,
            events: result.events.clone(),
            recorded_at: Utc::now(),
        }
    }
}
