use serde_json::json;
use stepline_core::{
    AgentEvent, AgentState, ContextPayload, NextContext, StateMessage, StreamEventType,
    ToolCallPayload, ToolExecutionResult, ToolInvocation, UsageCounter,
};
use tracing::{debug, error, warn};

use super::{ExecutorContext, ExecutorOutput, RuntimeExecutors, running_context};
use crate::collaborators::{NewMessage, ToolExecutionContext};
use crate::error::RuntimeResult;

impl RuntimeExecutors {
    pub(super) async fn call_tool(
        &self,
        ctx: &ExecutorContext,
        payload: ToolCallPayload,
        parent_message_id: Option<String>,
        state: &AgentState,
    ) -> RuntimeResult<ExecutorOutput> {
        let prefix = ctx.log_prefix("call_tool");
        let tool_name = payload.tool_name();

        self.publish(ctx, StreamEventType::ToolStart, serde_json::to_value(&payload)?)
            .await?;

        let result = match self.run_tool(ctx, &payload, state).await {
            Ok(result) => result,
            Err(e) => {
                // The state is returned untouched so a crashed tool cannot corrupt it
                let message = e.to_string();
                self.publish_error(ctx, "tool_execution", &message).await;
                error!(
                    operation_id = %ctx.operation_id,
                    step_index = ctx.step_index,
                    tool = %tool_name,
                    error = %message,
                    "Tool execution failed"
                );
                return Ok(ExecutorOutput {
                    events: vec![AgentEvent::Error {
                        error: message,
                        phase: "tool_execution".to_string(),
                    }],
                    new_state: state.clone(),
                    next_context: None,
                });
            }
        };

        let message = NewMessage {
            plugin_error: result.error.clone(),
            plugin_state: result.state.clone(),
            ..NewMessage::tool(&state.metadata, &payload, result.content.clone())
        }
        .with_parent(parent_message_id.clone());
        if let Err(e) = self.messages.create(message).await {
            warn!(operation_id = %ctx.operation_id, error = %e, "Failed to create tool message");
        }

        let mut new_state = state.clone();
        new_state
            .messages
            .push(StateMessage::tool(&payload.id, result.content.clone()));

        let price = self.pricing.price_of(&tool_name).unwrap_or(0.0);
        let (usage, cost) = UsageCounter::accumulate_tool(
            &new_state.usage,
            &new_state.cost,
            ToolInvocation {
                tool_name: &tool_name,
                execution_time_ms: result.execution_time_ms,
                success: result.success,
                tool_cost: Some(price),
            },
        );
        new_state.usage = usage;
        new_state.cost = cost;

        let calls = new_state
            .usage
            .tools
            .by_tool
            .iter()
            .find(|t| t.name == tool_name)
            .map_or(0, |t| t.calls);
        debug!(
            "{prefix} {tool_name}: calls={calls}, time={}ms, success={}, cost=${price:.4}",
            result.execution_time_ms, result.success
        );

        let events = vec![AgentEvent::ToolResult {
            id: payload.id.clone(),
            result: result.clone(),
        }];
        let mut next = NextContext::new(
            ContextPayload::ToolResult {
                tool_call_id: payload.id.clone(),
                data: serde_json::to_value(&result)?,
                execution_time_ms: result.execution_time_ms,
                is_success: result.success,
                tool_call: payload,
                parent_message_id,
            },
            &new_state,
            events.len(),
        );
        next.step_usage = Some(json!({
            "cost": price,
            "toolName": tool_name,
            "unitPrice": price,
            "usageCount": 1,
        }));

        Ok(ExecutorOutput {
            next_context: Some(running_context(next, state)),
            events,
            new_state,
        })
    }

    /// Execute the tool and announce the outcome with `tool_end`
    async fn run_tool(
        &self,
        ctx: &ExecutorContext,
        payload: &ToolCallPayload,
        state: &AgentState,
    ) -> RuntimeResult<ToolExecutionResult> {
        debug!("{} Executing tool {}", ctx.log_prefix("call_tool"), payload.tool_name());
        let result = self
            .tools
            .execute_tool(
                payload,
                ToolExecutionContext {
                    tool_manifest_map: state.tool_manifest_map.clone(),
                    user_id: ctx.user_id.clone(),
                },
            )
            .await?;

        self.publish(
            ctx,
            StreamEventType::ToolEnd,
            json!({
                "executionTime": result.execution_time_ms,
                "isSuccess": result.success,
                "payload": payload,
                "phase": "tool_execution",
                "result": result,
            }),
        )
        .await?;
        Ok(result)
    }
}
