//! Agent runtime service
//!
//! Drives an operation one step at a time: the planner picks an instruction,
//! the executors run it, the coordinator persists the result. Steps run inline
//! through [`AgentRuntimeService::execute_step`] or in a loop through
//! [`AgentRuntimeService::execute_sync`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stepline_core::{
    AgentInstruction, AgentState, AgentStatus, ContextPayload, Cost, CostLimit, CostLimitAction,
    CreateOperationParams, Interruption, MessageRole, ModelRuntimeConfig, NewStreamEvent,
    NextContext, OperationMetadata, StateMessage, StateMetadata, StepRecord, StepResult,
    StreamEvent, StreamEventType, ToolCallPayload, Usage,
};
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::coordinator::AgentRuntimeCoordinator;
use crate::error::{RuntimeError, RuntimeResult};
use crate::executors::{ExecutorContext, RuntimeExecutors};
use crate::planner::AgentPlanner;
use crate::tool_name::ToolNameResolver;

/// Events fetched for a status report; only the newest ten are returned
const RECENT_EVENTS_FETCH: usize = 20;
const RECENT_EVENTS_RETURNED: usize = 10;

pub const DEFAULT_STATUS_HISTORY_LIMIT: usize = 10;

/// Why an operation stopped advancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Done,
    Error,
    Interrupted,
    WaitingForHuman,
    MaxSteps,
    CostLimit,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Done => "done",
            CompletionReason::Error => "error",
            CompletionReason::Interrupted => "interrupted",
            CompletionReason::WaitingForHuman => "waiting_for_human",
            CompletionReason::MaxSteps => "max_steps",
            CompletionReason::CostLimit => "cost_limit",
        }
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hooks invoked around each step of one operation
///
/// All methods default to no-ops.
#[async_trait]
pub trait StepCallbacks: Send + Sync {
    async fn on_before_step(&self, _operation_id: &str, _step_index: u32, _state: &AgentState) {}

    async fn on_after_step(
        &self,
        _operation_id: &str,
        _result: &StepResult,
        _should_continue: bool,
    ) {
    }

    async fn on_complete(
        &self,
        _operation_id: &str,
        _final_state: &AgentState,
        _reason: CompletionReason,
    ) {
    }
}

/// Everything needed to start a new operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOperationRequest {
    /// Generated when absent
    pub operation_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_config: Option<Value>,
    pub model_runtime_config: Option<ModelRuntimeConfig>,
    pub initial_messages: Vec<StateMessage>,
    pub tool_manifest_map: BTreeMap<String, Value>,
    pub max_steps: Option<u32>,
    pub cost_limit: Option<CostLimit>,
    /// Session, thread and topic ids of the surrounding chat
    pub app_context: StateMetadata,
}

impl CreateOperationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_agent_config(mut self, agent_config: Value) -> Self {
        self.agent_config = Some(agent_config);
        self
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.model_runtime_config = Some(ModelRuntimeConfig::new(provider, model));
        self
    }

    pub fn with_messages(mut self, messages: Vec<StateMessage>) -> Self {
        self.initial_messages = messages;
        self
    }

    pub fn with_tool_manifest(mut self, identifier: impl Into<String>, manifest: Value) -> Self {
        self.tool_manifest_map.insert(identifier.into(), manifest);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_cost_limit(mut self, max_total_cost: f64, on_exceeded: CostLimitAction) -> Self {
        self.cost_limit = Some(CostLimit {
            max_total_cost,
            on_exceeded,
        });
        self
    }

    pub fn with_app_context(mut self, app_context: StateMetadata) -> Self {
        self.app_context = app_context;
        self
    }

    fn initial_state(&self, operation_id: &str) -> AgentState {
        let mut state = AgentState::new(operation_id).with_messages(self.initial_messages.clone());
        state.metadata = StateMetadata {
            user_id: self.user_id.clone(),
            ..self.app_context.clone()
        };
        state.model_runtime_config = self.model_runtime_config.clone();
        state.tool_manifest_map = self.tool_manifest_map.clone();
        state.max_steps = self.max_steps;
        state.cost_limit = self.cost_limit.clone();
        state
    }
}

/// What one `execute_step` call produced
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step_result: StepResult,
    pub should_continue: bool,
}

impl StepOutcome {
    pub fn state(&self) -> &AgentState {
        &self.step_result.new_state
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteSyncOptions {
    /// Context for the first step; derived from the transcript when absent
    pub initial_context: Option<NextContext>,
    /// Overrides the configured step cap for this call
    pub max_steps: Option<u32>,
}

impl ExecuteSyncOptions {
    pub fn with_initial_context(mut self, context: NextContext) -> Self {
        self.initial_context = Some(context);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Decision supplied for an operation waiting on tool approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanDecision {
    Approve,
    Reject { reason: Option<String> },
}

/// Result of applying a [`HumanDecision`]
#[derive(Debug, Clone, PartialEq)]
pub enum InterventionOutcome {
    /// Pending calls were approved; continue with this context
    Resumed(NextContext),
    /// Pending calls were aborted and the operation finished
    Aborted(StepResult),
}

/// Subset of the state shown in status reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub status: AgentStatus,
    pub step_count: u32,
    pub cost: Cost,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<CostLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tools_calling: Option<Vec<ToolCallPayload>>,
    pub last_modified: DateTime<Utc>,
}

impl From<&AgentState> for StateSummary {
    fn from(state: &AgentState) -> Self {
        Self {
            status: state.status,
            step_count: state.step_count,
            cost: state.cost.clone(),
            usage: state.usage.clone(),
            cost_limit: state.cost_limit.clone(),
            max_steps: state.max_steps,
            error: state.error.clone(),
            interruption: state.interruption.clone(),
            pending_tools_calling: state.pending_tools_calling.clone(),
            last_modified: state.last_modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatusStats {
    /// Milliseconds since the operation was created
    pub uptime: i64,
    /// Milliseconds since the operation was last active
    pub last_active_time: i64,
    pub total_cost: f64,
    pub total_messages: usize,
    pub total_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub operation_id: String,
    pub current_state: StateSummary,
    pub metadata: OperationMetadata,
    pub stats: OperationStatusStats,
    pub has_error: bool,
    pub is_active: bool,
    pub is_completed: bool,
    pub needs_human_input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_history: Option<Vec<StepRecord>>,
    /// Newest-first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_events: Option<Vec<StreamEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusQuery {
    pub include_history: bool,
    pub history_limit: usize,
}

impl Default for StatusQuery {
    fn default() -> Self {
        Self {
            include_history: false,
            history_limit: DEFAULT_STATUS_HISTORY_LIMIT,
        }
    }
}

impl StatusQuery {
    pub fn with_history(limit: usize) -> Self {
        Self {
            include_history: true,
            history_limit: limit,
        }
    }
}

/// An operation paused on tool approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingIntervention {
    pub operation_id: String,
    pub status: AgentStatus,
    pub step_count: u32,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tools_calling: Option<Vec<ToolCallPayload>>,
}

/// Which operations to inspect for pending interventions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterventionFilter {
    Operation(String),
    User(String),
}

pub struct AgentRuntimeService {
    coordinator: AgentRuntimeCoordinator,
    executors: RuntimeExecutors,
    planner: Arc<dyn AgentPlanner>,
    config: RuntimeConfig,
    callbacks: DashMap<String, Arc<dyn StepCallbacks>>,
}

impl AgentRuntimeService {
    pub fn new(
        coordinator: AgentRuntimeCoordinator,
        executors: RuntimeExecutors,
        planner: Arc<dyn AgentPlanner>,
    ) -> Self {
        Self {
            coordinator,
            executors,
            planner,
            config: RuntimeConfig::default(),
            callbacks: DashMap::new(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.executors = self.executors.with_buffer_interval(config.buffer_interval);
        self.config = config;
        self
    }

    pub fn coordinator(&self) -> &AgentRuntimeCoordinator {
        &self.coordinator
    }

    pub fn register_step_callbacks(&self, operation_id: &str, callbacks: Arc<dyn StepCallbacks>) {
        self.callbacks.insert(operation_id.to_string(), callbacks);
        debug!(operation_id, "Registered step callbacks");
    }

    pub fn unregister_step_callbacks(&self, operation_id: &str) {
        self.callbacks.remove(operation_id);
        debug!(operation_id, "Unregistered step callbacks");
    }

    fn step_callbacks(&self, operation_id: &str) -> Option<Arc<dyn StepCallbacks>> {
        self.callbacks
            .get(operation_id)
            .map(|entry| entry.value().clone())
    }

    async fn complete(&self, operation_id: &str, state: &AgentState, reason: CompletionReason) {
        if let Some(callbacks) = self.step_callbacks(operation_id) {
            callbacks.on_complete(operation_id, state, reason).await;
            self.unregister_step_callbacks(operation_id);
        }
    }

    /// Register a new `idle` operation and save its initial state
    ///
    /// Returns the operation id.
    pub async fn create_operation(&self, request: CreateOperationRequest) -> RuntimeResult<String> {
        let operation_id = request
            .operation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let model_runtime_config = request
            .model_runtime_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        self.coordinator
            .create_agent_operation(
                &operation_id,
                CreateOperationParams {
                    agent_config: request.agent_config.clone(),
                    model_runtime_config,
                    user_id: request.user_id.clone(),
                },
            )
            .await?;
        self.coordinator
            .save_agent_state(&operation_id, &request.initial_state(&operation_id))
            .await?;

        info!(operation_id = %operation_id, "Created operation");
        Ok(operation_id)
    }

    /// Run one planner decision against the stored state and persist the result
    ///
    /// # Errors
    ///
    /// Any failure is published as an `error` event with phase
    /// `step_execution` and then returned.
    pub async fn execute_step(
        &self,
        operation_id: &str,
        step_index: u32,
        context: Option<NextContext>,
    ) -> RuntimeResult<StepOutcome> {
        match self.run_step(operation_id, step_index, context).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(operation_id, step_index, error = %e, "Step failed");
                let data = json!({
                    "error": e.to_string(),
                    "phase": "step_execution",
                    "stepIndex": step_index,
                });
                if let Err(publish_err) = self
                    .coordinator
                    .event_publisher()
                    .publish_stream_event(
                        operation_id,
                        NewStreamEvent::new(StreamEventType::Error, step_index, data),
                    )
                    .await
                {
                    error!(operation_id, error = %publish_err, "Failed to publish step error");
                }

                if self.callbacks.contains_key(operation_id) {
                    match self.coordinator.load_agent_state(operation_id).await {
                        Ok(Some(state)) => {
                            self.complete(operation_id, &state, CompletionReason::Error)
                                .await
                        }
                        Ok(None) => self.unregister_step_callbacks(operation_id),
                        Err(load_err) => {
                            warn!(operation_id, error = %load_err, "Could not load state for completion callback")
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_step(
        &self,
        operation_id: &str,
        step_index: u32,
        context: Option<NextContext>,
    ) -> RuntimeResult<StepOutcome> {
        debug!(operation_id, step_index, "Executing step");
        self.coordinator
            .event_publisher()
            .publish_stream_event(
                operation_id,
                NewStreamEvent::new(StreamEventType::StepStart, step_index, json!({})),
            )
            .await?;

        let (state, metadata) = tokio::try_join!(
            self.coordinator.load_agent_state(operation_id),
            self.coordinator.get_operation_metadata(operation_id),
        )?;
        let state = state.ok_or_else(|| RuntimeError::StateNotFound(operation_id.to_string()))?;
        let user_id = metadata
            .and_then(|m| m.user_id)
            .or_else(|| state.metadata.user_id.clone());

        let callbacks = self.step_callbacks(operation_id);
        if let Some(callbacks) = &callbacks {
            callbacks.on_before_step(operation_id, step_index, &state).await;
        }

        let instruction = self
            .planner
            .next_instruction(&state, context.as_ref())
            .await?;
        let step_result = self
            .execute_instruction(operation_id, step_index, user_id, instruction, &state)
            .await?;

        let should_continue = should_continue_execution(
            &step_result.new_state,
            step_result.next_context.as_ref(),
        );

        self.coordinator
            .event_publisher()
            .publish_stream_event(
                operation_id,
                NewStreamEvent::new(
                    StreamEventType::StepComplete,
                    step_index,
                    json!({
                        "finalState": step_result.new_state,
                        "nextStepScheduled": false,
                        "stepIndex": step_index,
                    }),
                ),
            )
            .await?;
        debug!(operation_id, step_index, should_continue, "Step completed");

        if let Some(callbacks) = &callbacks {
            callbacks
                .on_after_step(operation_id, &step_result, should_continue)
                .await;
        }
        if !should_continue {
            let reason = determine_completion_reason(&step_result.new_state);
            self.complete(operation_id, &step_result.new_state, reason)
                .await;
        }

        Ok(StepOutcome {
            step_result,
            should_continue,
        })
    }

    /// Execute `instruction`, advance the step counter and save the step
    async fn execute_instruction(
        &self,
        operation_id: &str,
        step_index: u32,
        user_id: Option<String>,
        instruction: AgentInstruction,
        state: &AgentState,
    ) -> RuntimeResult<StepResult> {
        let ctx = ExecutorContext::new(operation_id, step_index).with_user(user_id);
        let started = Instant::now();
        let output = self.executors.execute(&ctx, instruction, state).await?;

        let mut new_state = output.new_state;
        new_state.step_count = state.step_count + 1;
        if new_state.status == AgentStatus::Idle {
            new_state.status = AgentStatus::Running;
        }
        new_state.touch();

        let step_result = StepResult {
            new_state,
            step_index,
            execution_time_ms: started.elapsed().as_millis() as u64,
            events: output.events,
            next_context: output.next_context,
        };
        self.coordinator
            .save_step_result(operation_id, &step_result)
            .await?;
        Ok(step_result)
    }

    /// Run steps inline until the operation stops, pauses or hits the step cap
    pub async fn execute_sync(
        &self,
        operation_id: &str,
        options: ExecuteSyncOptions,
    ) -> RuntimeResult<AgentState> {
        let max_steps = options.max_steps.unwrap_or(self.config.max_sync_steps);
        let mut state = self
            .coordinator
            .load_agent_state(operation_id)
            .await?
            .ok_or_else(|| RuntimeError::StateNotFound(operation_id.to_string()))?;
        let mut context = Some(
            options
                .initial_context
                .unwrap_or_else(|| default_context(&state)),
        );
        let mut step_index = state.step_count;

        info!(operation_id, max_steps, "Starting sync execution");

        while step_index < max_steps {
            if state.status.is_terminal() {
                debug!(operation_id, status = %state.status, "Sync execution finished");
                break;
            }
            if state.status == AgentStatus::WaitingForHuman {
                debug!(operation_id, "Sync execution paused for human intervention");
                break;
            }

            let outcome = self
                .execute_step(operation_id, step_index, context.take())
                .await?;
            step_index += 1;
            context = outcome.step_result.next_context;
            state = outcome.step_result.new_state;

            if !outcome.should_continue {
                debug!(operation_id, step_index, "Sync execution stopped");
                break;
            }
        }

        if step_index >= max_steps {
            warn!(operation_id, max_steps, "Sync execution reached step cap");
            if !matches!(state.status, AgentStatus::Done | AgentStatus::Error) {
                self.complete(operation_id, &state, CompletionReason::MaxSteps)
                    .await;
            }
        }
        Ok(state)
    }

    /// Mark an operation `running` and return the context its first step should use
    pub async fn start_execution(
        &self,
        operation_id: &str,
        context: Option<NextContext>,
    ) -> RuntimeResult<NextContext> {
        if self
            .coordinator
            .get_operation_metadata(operation_id)
            .await?
            .is_none()
        {
            return Err(RuntimeError::OperationNotFound(operation_id.to_string()));
        }
        let mut state = self
            .coordinator
            .load_agent_state(operation_id)
            .await?
            .ok_or_else(|| RuntimeError::StateNotFound(operation_id.to_string()))?;

        match state.status {
            AgentStatus::Running => return Err(RuntimeError::AlreadyRunning(operation_id.to_string())),
            AgentStatus::Done => return Err(RuntimeError::AlreadyCompleted(operation_id.to_string())),
            AgentStatus::Error => return Err(RuntimeError::InErrorState(operation_id.to_string())),
            _ => {}
        }

        let context = context.unwrap_or_else(|| default_context(&state));
        state.status = AgentStatus::Running;
        state.touch();
        self.coordinator.save_agent_state(operation_id, &state).await?;
        info!(operation_id, "Started execution");
        Ok(context)
    }

    /// Apply a human decision to an operation waiting on tool approval
    ///
    /// Approval resumes the run with the approved calls. Rejection records an
    /// aborted reply for every pending call and finishes the operation.
    pub async fn process_human_intervention(
        &self,
        operation_id: &str,
        decision: HumanDecision,
    ) -> RuntimeResult<InterventionOutcome> {
        let mut state = self
            .coordinator
            .load_agent_state(operation_id)
            .await?
            .ok_or_else(|| RuntimeError::StateNotFound(operation_id.to_string()))?;

        let target = match decision {
            HumanDecision::Approve => AgentStatus::Running,
            HumanDecision::Reject { .. } => AgentStatus::Done,
        };
        if state.status != AgentStatus::WaitingForHuman {
            return Err(RuntimeError::InvalidTransition {
                from: state.status,
                to: target,
            });
        }

        let pending = state.pending_tools_calling.take().unwrap_or_default();

        match decision {
            HumanDecision::Approve => {
                state.status = AgentStatus::Running;
                state.touch();
                self.coordinator.save_agent_state(operation_id, &state).await?;
                info!(operation_id, approved = pending.len(), "Tool calls approved");

                let context = NextContext::new(
                    ContextPayload::HumanApprovedTool {
                        approved: pending,
                        parent_message_id: None,
                    },
                    &state,
                    0,
                );
                Ok(InterventionOutcome::Resumed(context))
            }
            HumanDecision::Reject { reason } => {
                info!(
                    operation_id,
                    rejected = pending.len(),
                    reason = reason.as_deref().unwrap_or("none"),
                    "Tool calls rejected"
                );
                let instruction = AgentInstruction::ResolveAbortedTools {
                    tool_calls: pending.iter().map(ToolNameResolver::to_call).collect(),
                    parent_message_id: None,
                };
                let step_index = state.step_count;
                let user_id = state.metadata.user_id.clone();
                let result = self
                    .execute_instruction(operation_id, step_index, user_id, instruction, &state)
                    .await?;
                self.complete(operation_id, &result.new_state, CompletionReason::Done)
                    .await;
                Ok(InterventionOutcome::Aborted(result))
            }
        }
    }

    /// Stop an operation from outside; it will not be stepped again
    pub async fn interrupt_operation(
        &self,
        operation_id: &str,
        reason: impl Into<String>,
    ) -> RuntimeResult<AgentState> {
        let mut state = self
            .coordinator
            .load_agent_state(operation_id)
            .await?
            .ok_or_else(|| RuntimeError::StateNotFound(operation_id.to_string()))?;
        if !state.status.can_transition_to(AgentStatus::Interrupted) {
            return Err(RuntimeError::InvalidTransition {
                from: state.status,
                to: AgentStatus::Interrupted,
            });
        }

        let reason = reason.into();
        state.status = AgentStatus::Interrupted;
        state.interruption = Some(Interruption {
            reason: reason.clone(),
            interrupted_at: Utc::now(),
            can_resume: false,
        });
        state.touch();
        self.coordinator.save_agent_state(operation_id, &state).await?;
        self.complete(operation_id, &state, CompletionReason::Interrupted)
            .await;

        info!(operation_id, reason = %reason, "Interrupted operation");
        Ok(state)
    }

    /// Status report, or `None` when the operation is unknown or expired
    pub async fn get_operation_status(
        &self,
        operation_id: &str,
        query: StatusQuery,
    ) -> RuntimeResult<Option<OperationStatus>> {
        load_operation_status(&self.coordinator, operation_id, query).await
    }

    /// Operations waiting on a human decision
    ///
    /// Per-operation read failures are logged and the operation skipped.
    pub async fn get_pending_interventions(
        &self,
        filter: InterventionFilter,
    ) -> RuntimeResult<Vec<PendingIntervention>> {
        let operations = match filter {
            InterventionFilter::Operation(id) => vec![id],
            InterventionFilter::User(user_id) => self.operations_of(&user_id).await,
        };

        let mut pending = Vec::new();
        for operation_id in operations {
            let loaded = tokio::try_join!(
                self.coordinator.load_agent_state(&operation_id),
                self.coordinator.get_operation_metadata(&operation_id),
            );
            let (state, metadata) = match loaded {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(operation_id = %operation_id, error = %e, "Failed to load operation");
                    continue;
                }
            };
            let Some(state) = state.filter(|s| s.status == AgentStatus::WaitingForHuman) else {
                continue;
            };
            let (user_id, model_runtime_config) = metadata
                .map(|m| (m.user_id, m.model_runtime_config))
                .unwrap_or_default();
            pending.push(PendingIntervention {
                operation_id,
                status: state.status,
                step_count: state.step_count,
                last_modified: state.last_modified,
                user_id,
                model_runtime_config,
                pending_tools_calling: state.pending_tools_calling,
            });
        }
        Ok(pending)
    }

    async fn operations_of(&self, user_id: &str) -> Vec<String> {
        let active = match self.coordinator.get_active_operations().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Failed to list active operations");
                return Vec::new();
            }
        };

        let mut owned = Vec::new();
        for operation_id in active {
            match self.coordinator.get_operation_metadata(&operation_id).await {
                Ok(Some(metadata)) if metadata.user_id.as_deref() == Some(user_id) => {
                    owned.push(operation_id)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(operation_id = %operation_id, error = %e, "Failed to read operation metadata")
                }
            }
        }
        owned
    }
}

/// Status report built straight from the coordinator, `None` when unknown or expired
pub async fn load_operation_status(
    coordinator: &AgentRuntimeCoordinator,
    operation_id: &str,
    query: StatusQuery,
) -> RuntimeResult<Option<OperationStatus>> {
    let (state, metadata) = tokio::try_join!(
        coordinator.load_agent_state(operation_id),
        coordinator.get_operation_metadata(operation_id),
    )?;
    let (Some(state), Some(metadata)) = (state, metadata) else {
        debug!(operation_id, "Operation not found, may have expired");
        return Ok(None);
    };

    let (execution_history, recent_events) = if query.include_history {
        let history = coordinator
            .get_execution_history(operation_id, query.history_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(operation_id, error = %e, "Failed to load execution history");
                Vec::new()
            });
        let mut events = coordinator
            .get_stream_history(operation_id, RECENT_EVENTS_FETCH)
            .await
            .unwrap_or_else(|e| {
                warn!(operation_id, error = %e, "Failed to load recent events");
                Vec::new()
            });
        events.truncate(RECENT_EVENTS_RETURNED);
        (Some(history), Some(events))
    } else {
        (None, None)
    };

    let now = Utc::now();
    let stats = OperationStatusStats {
        uptime: now.signed_duration_since(metadata.created_at).num_milliseconds(),
        last_active_time: now
            .signed_duration_since(metadata.last_active_at)
            .num_milliseconds(),
        total_cost: state.cost.total,
        total_messages: state.messages.len(),
        total_steps: state.step_count,
    };

    Ok(Some(OperationStatus {
        operation_id: operation_id.to_string(),
        current_state: StateSummary::from(&state),
        has_error: state.status == AgentStatus::Error,
        is_active: state.status.is_active(),
        is_completed: state.status == AgentStatus::Done,
        needs_human_input: state.status == AgentStatus::WaitingForHuman,
        metadata,
        stats,
        execution_history,
        recent_events,
    }))
}

/// Whether another step should run after reaching `state` with `context`
pub fn should_continue_execution(state: &AgentState, context: Option<&NextContext>) -> bool {
    if matches!(
        state.status,
        AgentStatus::Done | AgentStatus::WaitingForHuman | AgentStatus::Error | AgentStatus::Interrupted
    ) {
        return false;
    }
    if state.max_steps.is_some_and(|max| state.step_count >= max) {
        return false;
    }
    if let Some(limit) = &state.cost_limit {
        if state.cost.total >= limit.max_total_cost {
            match limit.on_exceeded {
                CostLimitAction::Stop => return false,
                CostLimitAction::Warn => warn!(
                    operation_id = %state.operation_id,
                    total_cost = state.cost.total,
                    max_total_cost = limit.max_total_cost,
                    "Cost limit exceeded"
                ),
            }
        }
    }
    context.is_some()
}

pub fn determine_completion_reason(state: &AgentState) -> CompletionReason {
    match state.status {
        AgentStatus::Done => return CompletionReason::Done,
        AgentStatus::Error => return CompletionReason::Error,
        AgentStatus::Interrupted => return CompletionReason::Interrupted,
        AgentStatus::WaitingForHuman => return CompletionReason::WaitingForHuman,
        AgentStatus::Idle | AgentStatus::Running => {}
    }
    if state.max_steps.is_some_and(|max| state.step_count >= max) {
        return CompletionReason::MaxSteps;
    }
    if state
        .cost_limit
        .as_ref()
        .is_some_and(|limit| state.cost.total >= limit.max_total_cost)
    {
        return CompletionReason::CostLimit;
    }
    CompletionReason::Done
}

/// User-input context built from the latest user message
fn default_context(state: &AgentState) -> NextContext {
    let message = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    NextContext::user_input(message, state)
}
