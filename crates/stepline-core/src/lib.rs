//! # Stepline Core
//!
//! Data model and capability traits for driving a multi-step agent operation.
//!
//! An *operation* is one user-triggered agent run. Each step executes a single
//! [`AgentInstruction`] against the current [`AgentState`] and yields a
//! [`StepResult`]. State is persisted through a [`StateStore`]; progress is
//! exposed as an ordered, replayable log of [`StreamEvent`]s through an
//! [`EventPublisher`].
//!
//! Backends live in `stepline-store`; executors and the coordinator live in
//! `stepline-runtime`.

pub mod bounded_log;
pub mod error;
pub mod event;
pub mod instruction;
pub mod metadata;
pub mod publisher;
pub mod state;
pub mod step;
pub mod store;
pub mod stream;
pub mod usage;

pub use bounded_log::{BoundedLog, DEFAULT_HISTORY_LIMIT, DEFAULT_STREAM_MAX_LEN};
pub use error::{StoreError, StoreResult};
pub use event::{AgentEvent, LlmCallResult, LlmChunk, LlmChunkKind, ToolExecutionResult};
pub use instruction::{AgentInstruction, CallLlmPayload};
pub use metadata::{CreateOperationParams, OperationMetadata, OperationStats};
pub use publisher::EventPublisher;
pub use state::{
    AgentState, AgentStatus, CostLimit, CostLimitAction, Interruption, MessageRole,
    MessageToolCall, ModelRuntimeConfig, StateMessage, StateMetadata, StatusBucket,
    ToolCallPayload, ToolFunction,
};
pub use step::{ContextPayload, EventBatch, NextContext, SessionContext, StepRecord, StepResult};
pub use store::StateStore;
pub use stream::{
    NewStreamEvent, StreamChunk, StreamChunkType, StreamCursor, StreamEvent, StreamEventType,
    StreamId,
};
pub use usage::{Cost, ModelUsage, ToolInvocation, Usage, UsageCounter};

// Re-exported so downstream crates share one token type
pub use tokio_util::sync::CancellationToken;
