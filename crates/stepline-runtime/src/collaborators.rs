//! Capabilities the executors consume but do not own
//!
//! The message model persists chat messages, the tool-execution service runs
//! tools in their sandbox, and the model runtime streams LLM output. Pricing
//! is a lookup so deployments can swap the static table for their own.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepline_core::{MessageRole, MessageToolCall, ModelUsage, StateMessage, ToolCallPayload};
use stepline_core::{StateMetadata, ToolExecutionResult};

use crate::error::CollaboratorResult;

/// A chat message to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<ToolCallPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_intervention: Option<Value>,
}

impl NewMessage {
    fn in_session(role: MessageRole, content: String, metadata: &StateMetadata) -> Self {
        Self {
            role,
            content,
            from_model: None,
            from_provider: None,
            session_id: metadata.session_id.clone(),
            thread_id: metadata.thread_id.clone(),
            topic_id: metadata.topic_id.clone(),
            parent_id: None,
            tool_call_id: None,
            plugin: None,
            plugin_error: None,
            plugin_state: None,
            plugin_intervention: None,
        }
    }

    /// Empty assistant message that streaming output will fill in
    pub fn assistant(metadata: &StateMetadata, provider: &str, model: &str) -> Self {
        Self {
            from_model: Some(model.to_string()),
            from_provider: Some(provider.to_string()),
            ..Self::in_session(MessageRole::Assistant, String::new(), metadata)
        }
    }

    /// Tool reply bound to the call it answers
    pub fn tool(
        metadata: &StateMetadata,
        payload: &ToolCallPayload,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(payload.id.clone()),
            plugin: Some(payload.clone()),
            ..Self::in_session(MessageRole::Tool, content.into(), metadata)
        }
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Final content written back to the assistant message after streaming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolCallPayload>>,
}

/// Persisted chat messages
#[async_trait]
pub trait MessageModel: Send + Sync {
    /// Create a message and return its id
    async fn create(&self, message: NewMessage) -> CollaboratorResult<String>;

    async fn update(&self, id: &str, update: MessageUpdate) -> CollaboratorResult<()>;
}

/// Execution context handed to the tool service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolExecutionContext {
    pub tool_manifest_map: BTreeMap<String, Value>,
    pub user_id: Option<String>,
}

/// Runs tools in their sandbox
///
/// Tool-level failures come back as `Ok` with `success == false`; `Err` means
/// the service itself could not run the call.
#[async_trait]
pub trait ToolExecutionService: Send + Sync {
    async fn execute_tool(
        &self,
        payload: &ToolCallPayload,
        context: ToolExecutionContext,
    ) -> CollaboratorResult<ToolExecutionResult>;
}

/// Input for one streamed chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<StateMessage>,
    pub tools: Vec<Value>,
    pub user_id: Option<String>,
}

/// One increment of model output
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    Reasoning(String),
    /// Complete set of tool calls emitted so far
    ToolsCalling(Vec<MessageToolCall>),
    Grounding(Value),
    Completion { usage: Option<ModelUsage> },
}

pub type ChatStream = BoxStream<'static, CollaboratorResult<ChatDelta>>;

/// Streams LLM output; the stream must be drained for the call to complete
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> CollaboratorResult<ChatStream>;
}

/// Per-call price of a tool, keyed by `identifier/apiName`
pub trait ToolPricing: Send + Sync {
    fn price_of(&self, tool_name: &str) -> Option<f64>;
}

/// In-process price table
#[derive(Debug, Clone)]
pub struct StaticToolPricing {
    prices: HashMap<String, f64>,
}

impl StaticToolPricing {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, tool_name: impl Into<String>, price: f64) -> Self {
        self.prices.insert(tool_name.into(), price);
        self
    }
}

impl Default for StaticToolPricing {
    fn default() -> Self {
        Self::empty()
            .with_price("web-browsing/crawl", 0.002)
            .with_price("web-browsing/search", 0.001)
    }
}

impl ToolPricing for StaticToolPricing {
    fn price_of(&self, tool_name: &str) -> Option<f64> {
        self.prices.get(tool_name).copied()
    }
}
