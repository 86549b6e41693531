//! Wire-level stream envelopes, chunk payloads and stream cursors

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::state::ToolCallPayload;

/// Event type enum; this is the wire contract with subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    AgentRuntimeInit,
    AgentRuntimeEnd,
    StreamStart,
    StreamChunk,
    StreamEnd,
    ToolStart,
    ToolEnd,
    StepStart,
    StepComplete,
    Error,
}

impl StreamEventType {
    pub const ALL: [StreamEventType; 10] = [
        StreamEventType::AgentRuntimeInit,
        StreamEventType::AgentRuntimeEnd,
        StreamEventType::StreamStart,
        StreamEventType::StreamChunk,
        StreamEventType::StreamEnd,
        StreamEventType::ToolStart,
        StreamEventType::ToolEnd,
        StreamEventType::StepStart,
        StreamEventType::StepComplete,
        StreamEventType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventType::AgentRuntimeInit => "agent_runtime_init",
            StreamEventType::AgentRuntimeEnd => "agent_runtime_end",
            StreamEventType::StreamStart => "stream_start",
            StreamEventType::StreamChunk => "stream_chunk",
            StreamEventType::StreamEnd => "stream_end",
            StreamEventType::ToolStart => "tool_start",
            StreamEventType::ToolEnd => "tool_end",
            StreamEventType::StepStart => "step_start",
            StreamEventType::StepComplete => "step_complete",
            StreamEventType::Error => "error",
        }
    }
}

impl fmt::Display for StreamEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamEventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::decode("type", format!("unknown stream event type '{s}'")))
    }
}

/// Position in a per-operation log, formatted `millis-seq` like a Redis stream id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Smallest id strictly greater than `self` at wall-clock `now_ms`.
    ///
    /// Ids never go backwards even if the clock does.
    pub fn next_after(&self, now_ms: u64) -> StreamId {
        if now_ms > self.millis {
            StreamId::new(now_ms, 0)
        } else {
            StreamId::new(self.millis, self.seq + 1)
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidStreamId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((m, q)) => (m, Some(q)),
            None => (s, None),
        };
        let millis = millis.parse::<u64>().map_err(|_| invalid())?;
        let seq = match seq {
            Some(q) => q.parse::<u64>().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(StreamId { millis, seq })
    }
}

/// Where a subscriber starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamCursor {
    /// Only events appended after the subscription starts (`$`)
    #[default]
    Latest,
    /// Everything still retained in the log (`0`)
    Beginning,
    /// Events strictly after the given id
    After(StreamId),
}

impl StreamCursor {
    /// Parse a cursor string: `$`, `0`/`0-0`, or an explicit id
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s.trim() {
            "$" => Ok(StreamCursor::Latest),
            "0" | "0-0" => Ok(StreamCursor::Beginning),
            other => other.parse().map(StreamCursor::After),
        }
    }
}

impl fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCursor::Latest => f.write_str("$"),
            StreamCursor::Beginning => f.write_str("0-0"),
            StreamCursor::After(id) => id.fmt(f),
        }
    }
}

/// Event to be appended; the publisher assigns id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewStreamEvent {
    pub event_type: StreamEventType,
    pub step_index: u32,
    pub data: Value,
}

impl NewStreamEvent {
    pub fn new(event_type: StreamEventType, step_index: u32, data: Value) -> Self {
        Self {
            event_type,
            step_index,
            data,
        }
    }
}

/// Envelope as stored in and read back from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub id: String,
    pub operation_id: String,
    pub step_index: u32,
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub data: Value,
    /// Publish time, unix milliseconds
    pub timestamp: i64,
}

impl StreamEvent {
    pub fn stream_id(&self) -> Option<StreamId> {
        self.id.parse().ok()
    }
}

/// Sub-type of an incremental LLM output chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkType {
    Text,
    Reasoning,
    ToolsCalling,
    Image,
    Grounding,
    Base64Image,
    ContentPart,
    ReasoningPart,
}

/// Payload of a `stream_chunk` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub chunk_type: StreamChunkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_calling: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_list: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<Value>,
}

impl StreamChunk {
    fn empty(chunk_type: StreamChunkType) -> Self {
        Self {
            chunk_type,
            content: None,
            reasoning: None,
            tools_calling: None,
            grounding: None,
            image: None,
            image_list: None,
            part: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::empty(StreamChunkType::Text)
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: Some(reasoning.into()),
            ..Self::empty(StreamChunkType::Reasoning)
        }
    }

    /// Resolved tool payloads, used for approval prompts
    pub fn pending_tools(payloads: &[ToolCallPayload]) -> Self {
        Self {
            tools_calling: serde_json::to_value(payloads).ok(),
            ..Self::empty(StreamChunkType::ToolsCalling)
        }
    }

    pub fn grounding(grounding: Value) -> Self {
        Self {
            grounding: Some(grounding),
            ..Self::empty(StreamChunkType::Grounding)
        }
    }
}
