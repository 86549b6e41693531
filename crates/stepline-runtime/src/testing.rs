//! Scripted collaborators for exercising executors and the service
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use stepline_core::{ToolCallPayload, ToolExecutionResult};
use stepline_store::{InMemoryEventPublisher, InMemoryStateStore};

use crate::collaborators::{
    ChatDelta, ChatRequest, ChatStream, MessageModel, MessageUpdate, ModelRuntime, NewMessage,
    StaticToolPricing, ToolExecutionContext, ToolExecutionService,
};
use crate::coordinator::AgentRuntimeCoordinator;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::executors::RuntimeExecutors;
use crate::planner::AgentPlanner;
use crate::service::AgentRuntimeService;

/// Message model that keeps every call in memory
#[derive(Debug, Default)]
pub struct RecordingMessageModel {
    next_id: AtomicUsize,
    created: Mutex<Vec<NewMessage>>,
    updates: Mutex<Vec<(String, MessageUpdate)>>,
}

impl RecordingMessageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<NewMessage> {
        self.created.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, MessageUpdate)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageModel for RecordingMessageModel {
    async fn create(&self, message: NewMessage) -> CollaboratorResult<String> {
        let id = format!("msg_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.lock().unwrap().push(message);
        Ok(id)
    }

    async fn update(&self, id: &str, update: MessageUpdate) -> CollaboratorResult<()> {
        self.updates.lock().unwrap().push((id.to_string(), update));
        Ok(())
    }
}

type Script = Result<Vec<(Duration, ChatDelta)>, String>;

/// Model runtime that replays queued scripts, one per `chat` call
#[derive(Debug, Default)]
pub struct ScriptedModelRuntime {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModelRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue deltas delivered without delay
    pub fn with_script(self, deltas: Vec<ChatDelta>) -> Self {
        self.with_timed_script(deltas.into_iter().map(|d| (Duration::ZERO, d)).collect())
    }

    /// Queue deltas, each delivered after its delay
    pub fn with_timed_script(self, deltas: Vec<(Duration, ChatDelta)>) -> Self {
        self.scripts.lock().unwrap().push_back(Ok(deltas));
        self
    }

    /// Queue a call whose stream fails
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.scripts.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelRuntime for ScriptedModelRuntime {
    async fn chat(&self, request: ChatRequest) -> CollaboratorResult<ChatStream> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response left".to_string()));

        match script {
            Ok(deltas) => Ok(futures::stream::iter(deltas)
                .then(|(delay, delta)| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(delta)
                })
                .boxed()),
            Err(message) => Ok(futures::stream::iter(vec![Err(
                CollaboratorError::ModelRuntime(message),
            )])
            .boxed()),
        }
    }
}

/// Tool service with canned results keyed by `identifier/apiName`
#[derive(Debug, Default)]
pub struct StaticToolService {
    results: HashMap<String, ToolExecutionResult>,
    crash: Option<String>,
    calls: Mutex<Vec<ToolCallPayload>>,
}

impl StaticToolService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        self.results.insert(
            tool_name.into(),
            ToolExecutionResult {
                content: content.into(),
                success: true,
                execution_time_ms: 12,
                ..Default::default()
            },
        );
        self
    }

    pub fn with_tool_failure(
        mut self,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        self.results.insert(
            tool_name.into(),
            ToolExecutionResult {
                content: error.clone(),
                success: false,
                execution_time_ms: 3,
                error: Some(json!({ "message": error })),
                state: None,
            },
        );
        self
    }

    /// Make every call fail at the service level
    pub fn with_crash(mut self, message: impl Into<String>) -> Self {
        self.crash = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<ToolCallPayload> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutionService for StaticToolService {
    async fn execute_tool(
        &self,
        payload: &ToolCallPayload,
        _context: ToolExecutionContext,
    ) -> CollaboratorResult<ToolExecutionResult> {
        self.calls.lock().unwrap().push(payload.clone());
        if let Some(message) = &self.crash {
            return Err(CollaboratorError::ToolExecution(message.clone()));
        }
        let name = payload.tool_name();
        Ok(self
            .results
            .get(&name)
            .cloned()
            .unwrap_or_else(|| ToolExecutionResult {
                content: format!("Mock response for: {name}"),
                success: true,
                execution_time_ms: 1,
                ..Default::default()
            }))
    }
}

/// Executors wired to in-memory publishing and scripted collaborators
pub struct TestHarness {
    pub publisher: Arc<InMemoryEventPublisher>,
    pub messages: Arc<RecordingMessageModel>,
    pub tools: Arc<StaticToolService>,
    pub models: Arc<ScriptedModelRuntime>,
    pub executors: RuntimeExecutors,
}

impl TestHarness {
    pub fn new(models: ScriptedModelRuntime) -> Self {
        Self::build(
            Arc::new(InMemoryEventPublisher::default()),
            Arc::new(RecordingMessageModel::new()),
            Arc::new(StaticToolService::new()),
            Arc::new(models),
        )
    }

    pub fn with_tools(self, tools: StaticToolService) -> Self {
        Self::build(self.publisher, self.messages, Arc::new(tools), self.models)
    }

    /// Share an existing publisher, e.g. one also used by a coordinator
    pub fn with_publisher(self, publisher: Arc<InMemoryEventPublisher>) -> Self {
        Self::build(publisher, self.messages, self.tools, self.models)
    }

    /// Service over a fresh in-memory store that shares this harness's publisher
    pub fn service(&self, planner: impl AgentPlanner + 'static) -> AgentRuntimeService {
        let coordinator = AgentRuntimeCoordinator::new(
            Arc::new(InMemoryStateStore::default()),
            self.publisher.clone(),
        );
        AgentRuntimeService::new(coordinator, self.executors.clone(), Arc::new(planner))
    }

    fn build(
        publisher: Arc<InMemoryEventPublisher>,
        messages: Arc<RecordingMessageModel>,
        tools: Arc<StaticToolService>,
        models: Arc<ScriptedModelRuntime>,
    ) -> Self {
        let executors = RuntimeExecutors::new(
            publisher.clone(),
            messages.clone(),
            tools.clone(),
            models.clone(),
            Arc::new(StaticToolPricing::default()),
        );
        Self {
            publisher,
            messages,
            tools,
            models,
            executors,
        }
    }
}
