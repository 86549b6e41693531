//! # Stepline
//!
//! Step-driven agent runtime. Each step asks a planner for one instruction,
//! runs it, persists the result and streams what happened to subscribers.
//!
//! - [`core`]: state, instruction, event and capability types
//! - [`store`]: Redis and in-memory state stores and event publishers
//! - [`runtime`]: executors, the runtime coordinator and the step driver

pub use stepline_core as core;
pub use stepline_runtime as runtime;
pub use stepline_store as store;

pub use stepline_core::{AgentInstruction, AgentState, AgentStatus, EventPublisher, StateStore};
pub use stepline_runtime::{
    AgentPlanner, AgentRuntimeCoordinator, AgentRuntimeService, RuntimeError, RuntimeResult,
    ToolLoopPlanner,
};
