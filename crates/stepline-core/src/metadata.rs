//! Queryable operation summaries and aggregate statistics

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{AgentState, AgentStatus, StatusBucket};

/// Inputs accepted when an operation is first registered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOperationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl CreateOperationParams {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }
}

/// Lightweight summary stored beside the full state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub operation_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub status: AgentStatus,
    pub total_cost: f64,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<Value>,
}

impl OperationMetadata {
    /// Fresh `idle` record with zero cost and steps
    pub fn new(operation_id: impl Into<String>, params: CreateOperationParams) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            created_at: now,
            last_active_at: now,
            status: AgentStatus::Idle,
            total_cost: 0.0,
            total_steps: 0,
            user_id: params.user_id,
            agent_config: params.agent_config,
            model_runtime_config: params.model_runtime_config,
        }
    }

    /// Copy the derived fields from a newly saved state
    pub fn refresh_from(&mut self, state: &AgentState) {
        self.last_active_at = Utc::now();
        self.status = state.status;
        self.total_cost = state.cost.total;
        self.total_steps = state.step_count;
    }

    /// Whether the operation has been idle for longer than `ttl`
    pub fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);
        now.signed_duration_since(self.last_active_at) > ttl
    }
}

/// Operation counts bucketed by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub total_operations: usize,
    pub active_operations: usize,
    pub completed_operations: usize,
    pub error_operations: usize,
}

impl OperationStats {
    pub fn record(&mut self, status: AgentStatus) {
        self.total_operations += 1;
        match status.bucket() {
            StatusBucket::Active => self.active_operations += 1,
            StatusBucket::Completed => self.completed_operations += 1,
            StatusBucket::Failed => self.error_operations += 1,
            StatusBucket::Idle => {}
        }
    }

    pub fn from_statuses<I: IntoIterator<Item = AgentStatus>>(statuses: I) -> Self {
        let mut stats = Self::default();
        for status in statuses {
            stats.record(status);
        }
        stats
    }
}
