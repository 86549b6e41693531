//! Behaviour every backend must share
//!
//! Each check takes the capability as a trait object so the in-memory and
//! Redis test files run exactly the same assertions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stepline_core::{
    AgentEvent, AgentState, AgentStatus, CancellationToken, CreateOperationParams,
    EventPublisher, NewStreamEvent, StateMessage, StateStore, StepResult, StreamCursor,
    StreamEvent, StreamEventType,
};

pub fn unique_op(prefix: &str) -> String {
    format!(
        "{prefix}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    )
}

pub fn step(state: &AgentState, index: u32) -> StepResult {
    StepResult {
        new_state: state.clone(),
        step_index: index,
        execution_time_ms: 3,
        events: vec![AgentEvent::text(format!("chunk {index}"))],
        next_context: None,
    }
}

pub async fn metadata_lifecycle(store: &dyn StateStore, op: &str) {
    store
        .create_operation_metadata(op, CreateOperationParams::for_user("u1"))
        .await
        .unwrap();

    let meta = store.get_operation_metadata(op).await.unwrap().unwrap();
    assert_eq!(meta.status, AgentStatus::Idle);
    assert_eq!(meta.total_steps, 0);
    assert_eq!(meta.user_id.as_deref(), Some("u1"));

    let mut state = AgentState::new(op).with_status(AgentStatus::Running);
    state.step_count = 1;
    store.save_step_result(op, &step(&state, 0)).await.unwrap();

    let meta = store.get_operation_metadata(op).await.unwrap().unwrap();
    assert_eq!(meta.status, AgentStatus::Running);
    assert_eq!(meta.total_steps, 1);
    assert!(store.get_active_operations().await.unwrap().contains(&op.to_string()));

    store.delete_agent_operation(op).await.unwrap();
    assert!(store.get_operation_metadata(op).await.unwrap().is_none());
    assert!(store.load_agent_state(op).await.unwrap().is_none());
}

/// Expects `store` to be configured with a one second operation TTL
pub async fn expired_operation_is_hidden(store: &dyn StateStore, op: &str) {
    store
        .create_operation_metadata(op, CreateOperationParams::for_user("u1"))
        .await
        .unwrap();
    let state = AgentState::new(op).with_status(AgentStatus::Running);
    store.save_agent_state(op, &state).await.unwrap();
    assert!(store.get_active_operations().await.unwrap().contains(&op.to_string()));

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(store.get_operation_metadata(op).await.unwrap().is_none());
    assert!(store.load_agent_state(op).await.unwrap().is_none());
    assert!(!store.get_active_operations().await.unwrap().contains(&op.to_string()));
}

pub async fn load_returns_owned_copy(store: &dyn StateStore, op: &str) {
    let state = AgentState::new(op).with_messages(vec![StateMessage::user("hello")]);
    store.save_agent_state(op, &state).await.unwrap();

    let mut first = store.load_agent_state(op).await.unwrap().unwrap();
    first.messages.clear();
    first.status = AgentStatus::Done;

    let second = store.load_agent_state(op).await.unwrap().unwrap();
    assert_eq!(second.messages.len(), 1);
    assert_eq!(second.status, AgentStatus::Idle);

    store.delete_agent_operation(op).await.unwrap();
}

pub async fn history_is_bounded(store: &dyn StateStore, op: &str) {
    let state = AgentState::new(op);
    for i in 0..201 {
        store.save_step_result(op, &step(&state, i)).await.unwrap();
    }

    let history = store.get_execution_history(op, 1000).await.unwrap();
    assert_eq!(history.len(), 200);
    assert_eq!(history[0].step_index, 1);
    assert_eq!(history[199].step_index, 200);

    let recent = store.get_execution_history(op, 3).await.unwrap();
    let indexes: Vec<u32> = recent.iter().map(|r| r.step_index).collect();
    assert_eq!(indexes, vec![198, 199, 200]);

    let batches = store.get_step_events(op, 1000).await.unwrap();
    assert_eq!(batches.len(), 200);
    assert_eq!(batches[199].events.len(), 1);

    store.delete_agent_operation(op).await.unwrap();
}

pub async fn publish_and_replay(publisher: &dyn EventPublisher, op: &str) {
    for i in 0..5 {
        publisher
            .publish_stream_event(
                op,
                NewStreamEvent::new(StreamEventType::StepStart, i, json!({ "i": i })),
            )
            .await
            .unwrap();
    }

    let history = publisher.get_stream_history(op, 3).await.unwrap();
    let steps: Vec<u32> = history.iter().map(|e| e.step_index).collect();
    assert_eq!(steps, vec![4, 3, 2]);
    assert!(history.iter().all(|e| e.operation_id == op));
    assert!(publisher.get_active_operations_count().await.unwrap() >= 1);

    publisher.cleanup_operation(op).await.unwrap();
    assert!(publisher.get_stream_history(op, 10).await.unwrap().is_empty());
}

pub async fn subscriber_sees_events_in_order(publisher: Arc<dyn EventPublisher>, op: &str) {
    let cancel = CancellationToken::new();
    let reader = {
        let publisher = publisher.clone();
        let cancel = cancel.clone();
        let op = op.to_string();
        tokio::spawn(async move {
            let mut seen: Vec<StreamEvent> = Vec::new();
            let mut sink = |batch: Vec<StreamEvent>| {
                seen.extend(batch);
                if seen.len() >= 4 {
                    cancel.cancel();
                }
            };
            publisher
                .subscribe_stream_events(&op, StreamCursor::Beginning, &mut sink, cancel.clone())
                .await
                .unwrap();
            seen
        })
    };

    for i in 0..4 {
        publisher
            .publish_stream_event(
                op,
                NewStreamEvent::new(StreamEventType::StreamChunk, i, json!({ "i": i })),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let seen = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap();
    let steps: Vec<u32> = seen.iter().map(|e| e.step_index).collect();
    assert_eq!(steps, vec![0, 1, 2, 3]);

    publisher.cleanup_operation(op).await.unwrap();
}
