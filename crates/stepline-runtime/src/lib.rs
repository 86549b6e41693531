//! # Stepline Runtime
//!
//! Executes agent operations step by step on top of the `stepline-store`
//! backends.
//!
//! - [`RuntimeExecutors`] run the five instruction kinds, streaming progress
//!   through the event publisher as they go.
//! - [`AgentRuntimeCoordinator`] persists state and announces the start and
//!   end of each operation exactly once.
//! - [`AgentRuntimeService`] ties a planner, the executors and the coordinator
//!   into a step driver with human-approval and interruption support.
//!
//! External capabilities (message persistence, tool execution, the model
//! runtime, tool pricing) are traits in [`collaborators`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepline_runtime::{
//!     AgentRuntimeCoordinator, AgentRuntimeService, CreateOperationRequest, ExecuteSyncOptions,
//!     RuntimeExecutors, ToolLoopPlanner,
//! };
//!
//! # async fn run(executors: RuntimeExecutors) -> stepline_runtime::RuntimeResult<()> {
//! let coordinator = AgentRuntimeCoordinator::from_environment().await;
//! let service = AgentRuntimeService::new(coordinator, executors, Arc::new(ToolLoopPlanner::new()));
//!
//! let id = service
//!     .create_operation(CreateOperationRequest::new().for_user("u1").with_model("openai", "gpt-4o"))
//!     .await?;
//! let state = service.execute_sync(&id, ExecuteSyncOptions::default()).await?;
//! println!("{id} finished as {}", state.status);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executors;
pub mod planner;
pub mod service;
pub mod tool_name;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collaborators::{
    ChatDelta, ChatRequest, ChatStream, MessageModel, MessageUpdate, ModelRuntime, NewMessage,
    StaticToolPricing, ToolExecutionContext, ToolExecutionService, ToolPricing,
};
pub use config::RuntimeConfig;
pub use coordinator::AgentRuntimeCoordinator;
pub use error::{CollaboratorError, CollaboratorResult, RuntimeError, RuntimeResult};
pub use executors::{
    ABORTED_TOOL_CONTENT, ExecutorContext, ExecutorOutput, RuntimeExecutors, USER_ABORTED_REASON,
};
pub use planner::{AgentPlanner, ToolLoopPlanner};
pub use service::{
    AgentRuntimeService, CompletionReason, CreateOperationRequest, ExecuteSyncOptions,
    HumanDecision, InterventionFilter, InterventionOutcome, OperationStatus, PendingIntervention,
    StatusQuery, StepCallbacks, StepOutcome, determine_completion_reason, load_operation_status,
    should_continue_execution,
};
pub use tool_name::{TOOL_NAME_SEPARATOR, ToolNameResolver};
