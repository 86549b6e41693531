//! Agent state snapshot and the message/tool-call types it carries
//!
//! An [`AgentState`] is the complete picture of one operation at the end of a
//! step. Executors never mutate a state they were handed: they clone it, change
//! the clone and return it as the next snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::usage::{Cost, Usage};

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    WaitingForHuman,
    Done,
    Error,
    Interrupted,
}

/// Bucket an operation falls into for statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    Idle,
    Active,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::WaitingForHuman => "waiting_for_human",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
            AgentStatus::Interrupted => "interrupted",
        }
    }

    /// Parse the wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(AgentStatus::Idle),
            "running" => Some(AgentStatus::Running),
            "waiting_for_human" => Some(AgentStatus::WaitingForHuman),
            "done" => Some(AgentStatus::Done),
            "error" => Some(AgentStatus::Error),
            "interrupted" => Some(AgentStatus::Interrupted),
            _ => None,
        }
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Done | AgentStatus::Error | AgentStatus::Interrupted
        )
    }

    /// Running or paused on a human decision
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::WaitingForHuman)
    }

    pub fn bucket(&self) -> StatusBucket {
        match self {
            AgentStatus::Idle => StatusBucket::Idle,
            AgentStatus::Running | AgentStatus::WaitingForHuman => StatusBucket::Active,
            AgentStatus::Done => StatusBucket::Completed,
            AgentStatus::Error | AgentStatus::Interrupted => StatusBucket::Failed,
        }
    }

    /// Whether moving from `self` to `next` keeps status monotonic.
    ///
    /// Statuses only move toward a terminal state, with the single exception of
    /// `waiting_for_human -> running` when an approval resumes the run. Saving
    /// the same status again is always allowed.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            AgentStatus::Idle => true,
            AgentStatus::Running => next != AgentStatus::Idle,
            AgentStatus::WaitingForHuman => next != AgentStatus::Idle,
            AgentStatus::Done | AgentStatus::Error | AgentStatus::Interrupted => false,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat role of a message in the agent transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Function part of a raw LLM tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub arguments: String,
}

/// Tool call exactly as the model emitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_function_kind")]
    pub kind: String,
    pub function: ToolFunction,
}

fn default_function_kind() -> String {
    "function".to_string()
}

impl MessageToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_function_kind(),
            function: ToolFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A resolved tool invocation: which tool, which API, with what arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub id: String,
    pub identifier: String,
    pub api_name: String,
    pub arguments: String,
    #[serde(rename = "type", default = "default_tool_kind")]
    pub kind: String,
}

fn default_tool_kind() -> String {
    "default".to_string()
}

impl ToolCallPayload {
    pub fn new(
        id: impl Into<String>,
        identifier: impl Into<String>,
        api_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
            api_name: api_name.into(),
            arguments: arguments.into(),
            kind: default_tool_kind(),
        }
    }

    /// `identifier/apiName`, the key used for pricing and usage accounting
    pub fn tool_name(&self) -> String {
        format!("{}/{}", self.identifier, self.api_name)
    }
}

/// One entry in the transcript the planner feeds back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<MessageToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl StateMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            ..Self::user(content)
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Free-form context the chat layer attaches to an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Model/provider pair used when an instruction does not name one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ModelRuntimeConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            provider: Some(provider.into()),
        }
    }
}

/// What to do once accumulated cost passes the limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostLimitAction {
    #[default]
    Stop,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostLimit {
    pub max_total_cost: f64,
    #[serde(default)]
    pub on_exceeded: CostLimitAction,
}

/// Record of an external interruption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    pub reason: String,
    pub interrupted_at: DateTime<Utc>,
    pub can_resume: bool,
}

/// Full snapshot of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub operation_id: String,
    pub status: AgentStatus,
    pub step_count: u32,
    #[serde(default)]
    pub messages: Vec<StateMessage>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub cost: Cost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tools_calling: Option<Vec<ToolCallPayload>>,
    #[serde(default)]
    pub tool_manifest_map: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: StateMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<ModelRuntimeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<CostLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl AgentState {
    /// Fresh `idle` state with zeroed counters
    pub fn new(operation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            status: AgentStatus::Idle,
            step_count: 0,
            messages: Vec::new(),
            usage: Usage::default(),
            cost: Cost::new(now),
            pending_tools_calling: None,
            tool_manifest_map: BTreeMap::new(),
            metadata: StateMetadata::default(),
            model_runtime_config: None,
            max_steps: None,
            cost_limit: None,
            error: None,
            interruption: None,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn with_messages(mut self, messages: Vec<StateMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_metadata(mut self, metadata: StateMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_model_runtime_config(mut self, config: ModelRuntimeConfig) -> Self {
        self.model_runtime_config = Some(config);
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Stamp `last_modified` with the current time
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Tool calls from the latest assistant message that have no tool reply yet
    pub fn unanswered_tool_calls(&self) -> Vec<MessageToolCall> {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
        else {
            return Vec::new();
        };
        let Some(calls) = &self.messages[pos].tool_calls else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.messages[pos + 1..]
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        calls
            .iter()
            .filter(|c| !answered.contains(&c.id.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AgentStatus::Idle, AgentStatus::Running, true)]
    #[case(AgentStatus::Running, AgentStatus::WaitingForHuman, true)]
    #[case(AgentStatus::WaitingForHuman, AgentStatus::Running, true)]
    #[case(AgentStatus::Running, AgentStatus::Done, true)]
    #[case(AgentStatus::Done, AgentStatus::Done, true)]
    #[case(AgentStatus::Done, AgentStatus::Running, false)]
    #[case(AgentStatus::Error, AgentStatus::Running, false)]
    #[case(AgentStatus::Interrupted, AgentStatus::Done, false)]
    #[case(AgentStatus::Running, AgentStatus::Idle, false)]
    fn status_transitions(
        #[case] from: AgentStatus,
        #[case] to: AgentStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[rstest]
    #[case(AgentStatus::Running, StatusBucket::Active)]
    #[case(AgentStatus::WaitingForHuman, StatusBucket::Active)]
    #[case(AgentStatus::Done, StatusBucket::Completed)]
    #[case(AgentStatus::Error, StatusBucket::Failed)]
    #[case(AgentStatus::Interrupted, StatusBucket::Failed)]
    #[case(AgentStatus::Idle, StatusBucket::Idle)]
    fn status_buckets(#[case] status: AgentStatus, #[case] bucket: StatusBucket) {
        assert_eq!(status.bucket(), bucket);
    }

    #[test]
    fn status_wire_format_round_trips() {
        let json = serde_json::to_string(&AgentStatus::WaitingForHuman).unwrap();
        assert_eq!(json, "\"waiting_for_human\"");
        assert_eq!(
            AgentStatus::parse("waiting_for_human"),
            Some(AgentStatus::WaitingForHuman)
        );
        assert_eq!(AgentStatus::parse("paused"), None);
    }

    #[test]
    fn state_serializes_camel_case() {
        let state = AgentState::new("op-1");
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["operationId"], "op-1");
        assert_eq!(value["stepCount"], 0);
        assert_eq!(value["status"], "idle");
        assert!(value.get("pendingToolsCalling").is_none());
    }

    #[test]
    fn clone_does_not_alias_messages() {
        let state = AgentState::new("op-1").with_messages(vec![StateMessage::user("hi")]);
        let mut next = state.clone();
        next.messages.push(StateMessage::assistant("hello", vec![]));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(next.messages.len(), 2);
    }

    #[test]
    fn unanswered_tool_calls_skips_replied_ids() {
        let calls = vec![
            MessageToolCall::new("call_1", "search____query", "{}"),
            MessageToolCall::new("call_2", "search____query", "{}"),
        ];
        let state = AgentState::new("op-1").with_messages(vec![
            StateMessage::user("find things"),
            StateMessage::assistant("", calls),
            StateMessage::tool("call_1", "result"),
        ]);

        let pending = state.unanswered_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "call_2");
    }

    #[test]
    fn unanswered_tool_calls_empty_without_assistant() {
        let state = AgentState::new("op-1").with_messages(vec![StateMessage::user("hi")]);
        assert!(state.unanswered_tool_calls().is_empty());
    }

    #[test]
    fn tool_payload_name_and_default_kind() {
        let payload: ToolCallPayload = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "identifier": "web-browsing",
            "apiName": "search",
            "arguments": "{}"
        }))
        .unwrap();
        assert_eq!(payload.kind, "default");
        assert_eq!(payload.tool_name(), "web-browsing/search");
    }
}
