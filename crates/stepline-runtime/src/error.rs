//! Error types for executing agent steps

use stepline_core::{AgentStatus, StoreError};
use thiserror::Error;

/// Failure reported by an external capability (message model, tool service, model runtime)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Message model error: {0}")]
    MessageModel(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Model runtime error: {0}")]
    ModelRuntime(String),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Errors raised while creating, driving or inspecting an operation
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No model/provider configured for operation {0}")]
    MissingModelConfig(String),

    #[error("Agent state not found for operation {0}")]
    StateNotFound(String),

    #[error("Operation {0} not found")]
    OperationNotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("LLM execution failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Operation {0} is already running")]
    AlreadyRunning(String),

    #[error("Operation {0} is already completed")]
    AlreadyCompleted(String),

    #[error("Operation {0} is in error state")]
    InErrorState(String),
}

impl RuntimeError {
    /// Short code used in `error` stream events and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Store(_) => "STORE_ERROR",
            RuntimeError::MissingModelConfig(_) => "MISSING_MODEL_CONFIG",
            RuntimeError::StateNotFound(_) => "STATE_NOT_FOUND",
            RuntimeError::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            RuntimeError::InvalidTransition { .. } => "INVALID_TRANSITION",
            RuntimeError::Llm(_) => "LLM_ERROR",
            RuntimeError::Collaborator(_) => "COLLABORATOR_ERROR",
            RuntimeError::AlreadyRunning(_) => "ALREADY_RUNNING",
            RuntimeError::AlreadyCompleted(_) => "ALREADY_COMPLETED",
            RuntimeError::InErrorState(_) => "IN_ERROR_STATE",
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Store(err.into())
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_pass_through_unchanged() {
        let err: RuntimeError = StoreError::Unavailable("redis down".into()).into();
        assert_eq!(err.error_code(), "STORE_ERROR");
        assert_eq!(
            err.to_string(),
            StoreError::Unavailable("redis down".into()).to_string()
        );
    }

    #[test]
    fn transition_message_names_both_statuses() {
        let err = RuntimeError::InvalidTransition {
            from: AgentStatus::Done,
            to: AgentStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition from done to running"
        );
    }
}
