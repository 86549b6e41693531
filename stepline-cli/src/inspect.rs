//! Read-side commands over a runtime coordinator

use std::io::Write;

use serde_json::json;
use stepline_core::{CancellationToken, EventPublisher, StateStore, StreamCursor, StreamEvent};
use stepline_runtime::{AgentRuntimeCoordinator, RuntimeError, StatusQuery, load_operation_status};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation {0} not found")]
    NotFound(String),
}

pub type CliResult<T> = Result<T, CliError>;

/// Print stored events oldest-first, one JSON object per line
pub async fn history(
    coordinator: &AgentRuntimeCoordinator,
    operation_id: &str,
    count: usize,
    out: &mut impl Write,
) -> CliResult<usize> {
    let mut events = coordinator.get_stream_history(operation_id, count).await?;
    events.reverse();
    for event in &events {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
    }
    Ok(events.len())
}

pub async fn status(
    coordinator: &AgentRuntimeCoordinator,
    operation_id: &str,
    query: StatusQuery,
    out: &mut impl Write,
) -> CliResult<()> {
    let status = load_operation_status(coordinator, operation_id, query)
        .await?
        .ok_or_else(|| CliError::NotFound(operation_id.to_string()))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&status)?)?;
    Ok(())
}

pub async fn stats(coordinator: &AgentRuntimeCoordinator, out: &mut impl Write) -> CliResult<()> {
    let stats = coordinator.get_stats().await?;
    let streams = coordinator
        .event_publisher()
        .get_active_operations_count()
        .await
        .map_err(RuntimeError::from)?;
    let report = json!({
        "stateBackend": coordinator.state_store().backend(),
        "eventBackend": coordinator.event_publisher().backend(),
        "operations": stats,
        "activeStreams": streams,
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

pub async fn cleanup(coordinator: &AgentRuntimeCoordinator, out: &mut impl Write) -> CliResult<usize> {
    let removed = coordinator.cleanup_expired_operations().await?;
    writeln!(out, "{}", json!({ "removed": removed }))?;
    Ok(removed)
}

pub async fn delete(
    coordinator: &AgentRuntimeCoordinator,
    operation_id: &str,
    out: &mut impl Write,
) -> CliResult<()> {
    coordinator.delete_agent_operation(operation_id).await?;
    writeln!(out, "{}", json!({ "deleted": operation_id }))?;
    Ok(())
}

/// Follow an operation's events until `cancel` fires
pub async fn tail(
    coordinator: &AgentRuntimeCoordinator,
    operation_id: &str,
    from: StreamCursor,
    cancel: CancellationToken,
) -> CliResult<()> {
    let mut print = |events: Vec<StreamEvent>| {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        for event in events {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if let Err(e) = writeln!(lock, "{line}") {
                        tracing::warn!(error = %e, "Failed to write event");
                    }
                }
                Err(e) => tracing::warn!(event_id = %event.id, error = %e, "Failed to encode event"),
            }
        }
    };
    coordinator
        .event_publisher()
        .subscribe_stream_events(operation_id, from, &mut print, cancel)
        .await
        .map_err(RuntimeError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stepline_core::{AgentState, AgentStatus, CreateOperationParams};
    use stepline_store::{InMemoryEventPublisher, InMemoryStateStore};

    async fn seeded() -> AgentRuntimeCoordinator {
        let coordinator = AgentRuntimeCoordinator::new(
            Arc::new(InMemoryStateStore::default()),
            Arc::new(InMemoryEventPublisher::default()),
        );
        coordinator
            .create_agent_operation("op-1", CreateOperationParams::for_user("u1"))
            .await
            .unwrap();
        let state = AgentState::new("op-1").with_status(AgentStatus::Running);
        coordinator.save_agent_state("op-1", &state).await.unwrap();
        coordinator
            .save_agent_state("op-1", &state.with_status(AgentStatus::Done))
            .await
            .unwrap();
        coordinator
    }

    fn lines(out: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn history_prints_oldest_first() {
        let coordinator = seeded().await;
        let mut out = Vec::new();
        let printed = history(&coordinator, "op-1", 10, &mut out).await.unwrap();

        assert_eq!(printed, 2);
        let events = lines(&out);
        assert_eq!(events[0]["type"], "agent_runtime_init");
        assert_eq!(events[1]["type"], "agent_runtime_end");
    }

    #[tokio::test]
    async fn status_of_unknown_operation_is_an_error() {
        let coordinator = seeded().await;
        let mut out = Vec::new();
        let err = status(&coordinator, "missing", StatusQuery::default(), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::NotFound(id) if id == "missing"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn stats_report_backends_and_counts() {
        let coordinator = seeded().await;
        let mut out = Vec::new();
        stats(&coordinator, &mut out).await.unwrap();

        let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(report["stateBackend"], "memory");
        assert_eq!(report["operations"]["completedOperations"], 1);
        assert_eq!(report["activeStreams"], 1);
    }

    #[tokio::test]
    async fn delete_removes_history() {
        let coordinator = seeded().await;
        let mut out = Vec::new();
        delete(&coordinator, "op-1", &mut out).await.unwrap();

        let mut after = Vec::new();
        assert_eq!(history(&coordinator, "op-1", 10, &mut after).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tail_from_beginning_stops_on_cancel() {
        let coordinator = seeded().await;
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            stopper.cancel();
        });
        tail(&coordinator, "op-1", StreamCursor::Beginning, cancel)
            .await
            .unwrap();
    }
}
