use std::collections::BTreeMap;

use futures::StreamExt;
use serde_json::{Value, json};
use stepline_core::{
    AgentEvent, AgentState, CallLlmPayload, ContextPayload, LlmCallResult, MessageToolCall,
    ModelUsage, NextContext, StateMessage, StreamChunk, StreamEventType, ToolCallPayload,
    UsageCounter,
};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{ExecutorContext, ExecutorOutput, RuntimeExecutors, running_context};
use crate::buffer::{CoalescingBuffer, earliest, wait_until};
use crate::collaborators::{ChatDelta, ChatRequest, MessageUpdate, NewMessage};
use crate::error::{RuntimeError, RuntimeResult};
use crate::tool_name::ToolNameResolver;

/// Everything gathered while draining one LLM stream
#[derive(Debug, Default)]
struct StreamedOutput {
    content: String,
    reasoning: String,
    tool_calls: Vec<MessageToolCall>,
    tools_calling: Vec<ToolCallPayload>,
    grounding: Option<Value>,
    usage: Option<ModelUsage>,
    events: Vec<AgentEvent>,
}

impl RuntimeExecutors {
    pub(super) async fn call_llm(
        &self,
        ctx: &ExecutorContext,
        payload: CallLlmPayload,
        state: &AgentState,
    ) -> RuntimeResult<ExecutorOutput> {
        let prefix = ctx.log_prefix("call_llm");
        let fallback = state.model_runtime_config.clone().unwrap_or_default();
        let (Some(provider), Some(model)) = (
            payload.provider.clone().or(fallback.provider),
            payload.model.clone().or(fallback.model),
        ) else {
            return Err(RuntimeError::MissingModelConfig(ctx.operation_id.clone()));
        };

        debug!("{prefix} Starting LLM call ({provider}/{model})");

        let assistant_id = match payload.assistant_message_id.clone() {
            Some(id) => id,
            None => {
                self.messages
                    .create(
                        NewMessage::assistant(&state.metadata, &provider, &model)
                            .with_parent(payload.parent_message_id.clone()),
                    )
                    .await?
            }
        };

        self.publish(
            ctx,
            StreamEventType::StreamStart,
            json!({
                "assistantMessage": { "id": assistant_id },
                "model": model,
                "provider": provider,
            }),
        )
        .await?;

        let request = ChatRequest {
            provider: provider.clone(),
            model: model.clone(),
            messages: payload.messages,
            tools: payload.tools,
            user_id: ctx.user_id.clone(),
        };
        debug!(
            "{prefix} Calling model runtime (messages: {}, tools: {})",
            request.messages.len(),
            request.tools.len()
        );

        let streamed = match self.drain_llm(ctx, request, &state.tool_manifest_map).await {
            Ok(streamed) => streamed,
            Err(e) => {
                self.publish_error(ctx, "llm_execution", &e.to_string()).await;
                error!(
                    operation_id = %ctx.operation_id,
                    step_index = ctx.step_index,
                    error = %e,
                    "LLM execution failed"
                );
                return Err(e);
            }
        };

        debug!(
            "{prefix} LLM call finished (content: {} chars, tool calls: {})",
            streamed.content.len(),
            streamed.tools_calling.len()
        );

        let update = MessageUpdate {
            content: streamed.content.clone(),
            reasoning: (!streamed.reasoning.is_empty()).then(|| streamed.reasoning.clone()),
            metadata: streamed.usage.clone(),
            search: streamed.grounding.clone(),
            tools: (!streamed.tools_calling.is_empty()).then(|| streamed.tools_calling.clone()),
        };
        if let Err(e) = self.messages.update(&assistant_id, update).await {
            warn!(operation_id = %ctx.operation_id, error = %e, "Failed to update assistant message");
        }

        let mut new_state = state.clone();
        new_state.messages.push(StateMessage::assistant(
            streamed.content.clone(),
            streamed.tool_calls.clone(),
        ));
        if let Some(usage) = &streamed.usage {
            let (usage, cost) = UsageCounter::accumulate_llm(
                &new_state.usage,
                &new_state.cost,
                &provider,
                &model,
                usage,
            );
            new_state.usage = usage;
            new_state.cost = cost;
        }

        let events = streamed.events;
        let mut next = NextContext::new(
            ContextPayload::LlmResult {
                has_tools_calling: !streamed.tools_calling.is_empty(),
                content: streamed.content,
                tool_calls: streamed.tool_calls,
                tools_calling: streamed.tools_calling,
                parent_message_id: Some(assistant_id),
            },
            &new_state,
            events.len(),
        );
        next.step_usage = streamed
            .usage
            .as_ref()
            .and_then(|u| serde_json::to_value(u).ok());

        Ok(ExecutorOutput {
            next_context: Some(running_context(next, state)),
            events,
            new_state,
        })
    }

    /// Drain the model stream, publishing coalesced chunks, then `stream_end`
    async fn drain_llm(
        &self,
        ctx: &ExecutorContext,
        request: ChatRequest,
        manifests: &BTreeMap<String, Value>,
    ) -> RuntimeResult<StreamedOutput> {
        let mut stream = self
            .models
            .chat(request)
            .await
            .map_err(|e| RuntimeError::Llm(e.to_string()))?;

        let mut out = StreamedOutput::default();
        let mut text = CoalescingBuffer::new(self.buffer_interval);
        let mut reasoning = CoalescingBuffer::new(self.buffer_interval);

        loop {
            let deadline = earliest(&[text.deadline(), reasoning.deadline()]);
            tokio::select! {
                biased;
                _ = wait_until(deadline) => {
                    let now = Instant::now();
                    if text.is_due(now) {
                        self.flush_text(ctx, &mut text, &mut out.events).await?;
                    }
                    if reasoning.is_due(now) {
                        self.flush_reasoning(ctx, &mut reasoning, &mut out.events).await?;
                    }
                }
                delta = stream.next() => match delta {
                    None => break,
                    Some(Err(e)) => return Err(RuntimeError::Llm(e.to_string())),
                    Some(Ok(ChatDelta::Text(delta))) => {
                        out.content.push_str(&delta);
                        text.push(&delta);
                    }
                    Some(Ok(ChatDelta::Reasoning(delta))) => {
                        out.reasoning.push_str(&delta);
                        reasoning.push(&delta);
                    }
                    Some(Ok(ChatDelta::ToolsCalling(raw))) => {
                        let resolved = ToolNameResolver::resolve(&raw, manifests);
                        // Text streamed so far must reach subscribers before the tool calls
                        self.flush_text(ctx, &mut text, &mut out.events).await?;
                        self.publisher
                            .publish_stream_chunk(
                                &ctx.operation_id,
                                ctx.step_index,
                                &StreamChunk::pending_tools(&resolved),
                            )
                            .await?;
                        out.tool_calls = raw;
                        out.tools_calling = resolved;
                    }
                    Some(Ok(ChatDelta::Grounding(grounding))) => {
                        self.publisher
                            .publish_stream_chunk(
                                &ctx.operation_id,
                                ctx.step_index,
                                &StreamChunk::grounding(grounding.clone()),
                            )
                            .await?;
                        out.grounding = Some(grounding);
                    }
                    Some(Ok(ChatDelta::Completion { usage })) => {
                        if usage.is_some() {
                            out.usage = usage;
                        }
                    }
                }
            }
        }

        self.flush_text(ctx, &mut text, &mut out.events).await?;
        self.flush_reasoning(ctx, &mut reasoning, &mut out.events)
            .await?;

        out.events.push(AgentEvent::LlmResult {
            result: LlmCallResult {
                content: out.content.clone(),
                reasoning: (!out.reasoning.is_empty()).then(|| out.reasoning.clone()),
                tool_calls: out.tool_calls.clone(),
                usage: out.usage.clone(),
            },
        });

        self.publish(
            ctx,
            StreamEventType::StreamEnd,
            json!({
                "finalContent": out.content,
                "grounding": out.grounding,
                "reasoning": (!out.reasoning.is_empty()).then_some(&out.reasoning),
                "toolsCalling": out.tools_calling,
                "usage": out.usage,
            }),
        )
        .await?;

        Ok(out)
    }

    async fn flush_text(
        &self,
        ctx: &ExecutorContext,
        buffer: &mut CoalescingBuffer,
        events: &mut Vec<AgentEvent>,
    ) -> RuntimeResult<()> {
        if let Some(delta) = buffer.take() {
            self.publisher
                .publish_stream_chunk(&ctx.operation_id, ctx.step_index, &StreamChunk::text(&delta))
                .await?;
            events.push(AgentEvent::text(delta));
        }
        Ok(())
    }

    async fn flush_reasoning(
        &self,
        ctx: &ExecutorContext,
        buffer: &mut CoalescingBuffer,
        events: &mut Vec<AgentEvent>,
    ) -> RuntimeResult<()> {
        if let Some(delta) = buffer.take() {
            self.publisher
                .publish_stream_chunk(
                    &ctx.operation_id,
                    ctx.step_index,
                    &StreamChunk::reasoning(&delta),
                )
                .await?;
            events.push(AgentEvent::reasoning(delta));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stepline_core::{
        AgentStatus, EventPublisher, ModelRuntimeConfig, StreamChunkType, StreamEvent,
    };

    use super::*;
    use crate::collaborators::ChatDelta;
    use crate::testing::{ScriptedModelRuntime, TestHarness};

    fn payload(messages: Vec<StateMessage>) -> CallLlmPayload {
        CallLlmPayload {
            messages,
            ..Default::default()
        }
    }

    fn state() -> AgentState {
        AgentState::new("op-1")
            .with_model_runtime_config(ModelRuntimeConfig::new("openai", "gpt-4o"))
            .with_messages(vec![StateMessage::user("hi")])
    }

    async fn history(harness: &TestHarness) -> Vec<StreamEvent> {
        let mut events = harness
            .publisher
            .get_stream_history("op-1", 1000)
            .await
            .unwrap();
        events.reverse();
        events
    }

    #[tokio::test]
    async fn streams_text_between_start_and_end() {
        let harness = TestHarness::new(ScriptedModelRuntime::new().with_script(vec![
            ChatDelta::Text("Hel".into()),
            ChatDelta::Text("lo".into()),
            ChatDelta::Completion {
                usage: Some(ModelUsage {
                    total_input_tokens: Some(10),
                    total_output_tokens: Some(2),
                    cost: Some(0.01),
                    ..Default::default()
                }),
            },
        ]));
        let ctx = ExecutorContext::new("op-1", 0);

        let out = harness
            .executors
            .call_llm(&ctx, payload(vec![StateMessage::user("hi")]), &state())
            .await
            .unwrap();

        let events = history(&harness).await;
        assert_eq!(events.first().unwrap().event_type, StreamEventType::StreamStart);
        assert_eq!(events.last().unwrap().event_type, StreamEventType::StreamEnd);
        let text: String = events
            .iter()
            .filter(|e| e.event_type == StreamEventType::StreamChunk)
            .filter_map(|e| e.data["content"].as_str())
            .collect();
        assert_eq!(text, "Hello");

        assert_eq!(out.new_state.messages.len(), 2);
        assert_eq!(out.new_state.messages[1].content, "Hello");
        assert_eq!(out.new_state.usage.llm.api_calls, 1);
        assert_eq!(out.new_state.cost.total, 0.01);
        assert!(matches!(out.events.last(), Some(AgentEvent::LlmResult { .. })));

        let next = out.next_context.unwrap();
        assert_eq!(next.session.status, AgentStatus::Running);
        assert_eq!(next.session.step_count, 1);
        match next.payload {
            ContextPayload::LlmResult {
                has_tools_calling,
                parent_message_id,
                ..
            } => {
                assert!(!has_tools_calling);
                assert_eq!(parent_message_id.as_deref(), Some("msg_1"));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let updates = harness.messages.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.content, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn text_is_flushed_before_tool_calls() {
        let harness = TestHarness::new(ScriptedModelRuntime::new().with_timed_script(vec![
            (Duration::ZERO, ChatDelta::Text("Let me ".into())),
            (Duration::from_millis(5), ChatDelta::Text("search".into())),
            (
                Duration::from_millis(5),
                ChatDelta::ToolsCalling(vec![MessageToolCall::new(
                    "call_1",
                    "web-browsing____search",
                    "{}",
                )]),
            ),
        ]));
        let ctx = ExecutorContext::new("op-1", 0);

        let out = harness
            .executors
            .call_llm(&ctx, payload(vec![]), &state())
            .await
            .unwrap();

        let chunks: Vec<StreamChunkType> = history(&harness)
            .await
            .iter()
            .filter(|e| e.event_type == StreamEventType::StreamChunk)
            .map(|e| serde_json::from_value::<StreamChunk>(e.data.clone()).unwrap().chunk_type)
            .collect();
        assert_eq!(chunks, vec![StreamChunkType::Text, StreamChunkType::ToolsCalling]);

        match out.next_context.unwrap().payload {
            ContextPayload::LlmResult {
                has_tools_calling,
                tools_calling,
                ..
            } => {
                assert!(has_tools_calling);
                assert_eq!(tools_calling[0].identifier, "web-browsing");
                assert_eq!(tools_calling[0].api_name, "search");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_deltas_is_coalesced_and_flushed_before_tool_calls() {
        let words: Vec<String> = (0..30).map(|i| format!("w{i} ")).collect();
        let mut script: Vec<(Duration, ChatDelta)> = words
            .iter()
            .map(|w| (Duration::from_millis(1), ChatDelta::Text(w.clone())))
            .collect();
        script.push((
            Duration::from_millis(1),
            ChatDelta::ToolsCalling(vec![MessageToolCall::new("call_1", "calc____add", "{}")]),
        ));
        let harness = TestHarness::new(ScriptedModelRuntime::new().with_timed_script(script));
        let ctx = ExecutorContext::new("op-1", 0);

        let out = harness
            .executors
            .call_llm(&ctx, payload(vec![]), &state())
            .await
            .unwrap();

        let chunks: Vec<StreamChunk> = history(&harness)
            .await
            .iter()
            .filter(|e| e.event_type == StreamEventType::StreamChunk)
            .map(|e| serde_json::from_value(e.data.clone()).unwrap())
            .collect();
        let (last, texts) = chunks.split_last().unwrap();
        assert_eq!(last.chunk_type, StreamChunkType::ToolsCalling);
        assert!(texts.iter().all(|c| c.chunk_type == StreamChunkType::Text));
        assert!(texts.len() < words.len());

        let streamed: String = texts.iter().filter_map(|c| c.content.as_deref()).collect();
        assert_eq!(streamed, words.concat());
        assert_eq!(out.new_state.messages.last().unwrap().content, words.concat());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_deltas_produce_separate_chunks() {
        let harness = TestHarness::new(ScriptedModelRuntime::new().with_timed_script(vec![
            (Duration::ZERO, ChatDelta::Text("a".into())),
            (Duration::from_millis(200), ChatDelta::Text("b".into())),
        ]));
        let ctx = ExecutorContext::new("op-1", 0);
        harness
            .executors
            .call_llm(&ctx, payload(vec![]), &state())
            .await
            .unwrap();

        let chunks: Vec<String> = history(&harness)
            .await
            .iter()
            .filter(|e| e.event_type == StreamEventType::StreamChunk)
            .filter_map(|e| e.data["content"].as_str().map(str::to_string))
            .collect();
        assert_eq!(chunks, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn missing_model_config_fails_before_publishing() {
        let harness = TestHarness::new(ScriptedModelRuntime::new());
        let ctx = ExecutorContext::new("op-1", 0);
        let result = harness
            .executors
            .call_llm(&ctx, payload(vec![]), &AgentState::new("op-1"))
            .await;
        assert!(matches!(result, Err(RuntimeError::MissingModelConfig(_))));
        assert!(history(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn stream_failure_publishes_error_and_rethrows() {
        let harness = TestHarness::new(
            ScriptedModelRuntime::new().with_failure("upstream 500"),
        );
        let ctx = ExecutorContext::new("op-1", 0);
        let result = harness
            .executors
            .call_llm(&ctx, payload(vec![]), &state())
            .await;
        assert!(matches!(result, Err(RuntimeError::Llm(_))));

        let events = history(&harness).await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, StreamEventType::Error);
        assert_eq!(last.data["phase"], "llm_execution");
    }

    #[tokio::test]
    async fn preallocated_assistant_message_is_reused() {
        let harness = TestHarness::new(
            ScriptedModelRuntime::new().with_script(vec![ChatDelta::Text("ok".into())]),
        );
        let ctx = ExecutorContext::new("op-1", 0);
        let mut p = payload(vec![]);
        p.assistant_message_id = Some("pre-1".into());
        harness.executors.call_llm(&ctx, p, &state()).await.unwrap();

        assert!(harness.messages.created().is_empty());
        assert_eq!(harness.messages.updates()[0].0, "pre-1");
    }
}
