//! In-memory backends against the shared backend checks

mod common;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use stepline_core::{AgentState, AgentStatus, StateStore};
use stepline_store::{InMemoryEventPublisher, InMemoryStateStore, StoreConfig};

#[tokio::test]
async fn test_metadata_lifecycle() {
    let store = InMemoryStateStore::default();
    common::metadata_lifecycle(&store, "op-meta").await;
}

#[tokio::test]
async fn test_load_returns_owned_copy() {
    let store = InMemoryStateStore::default();
    common::load_returns_owned_copy(&store, "op-copy").await;
}

#[tokio::test]
async fn test_history_is_bounded() {
    let store = InMemoryStateStore::default();
    common::history_is_bounded(&store, "op-history").await;
}

#[tokio::test]
async fn test_expired_operation_is_hidden() {
    let store =
        InMemoryStateStore::new(&StoreConfig::default().with_operation_ttl(Duration::from_secs(1)));
    common::expired_operation_is_hidden(&store, "op-expired").await;

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_operations, 0);
}

#[tokio::test]
async fn test_publish_and_replay() {
    let publisher = InMemoryEventPublisher::default();
    common::publish_and_replay(&publisher, "op-stream").await;
}

#[tokio::test]
async fn test_subscriber_sees_events_in_order() {
    let publisher = Arc::new(InMemoryEventPublisher::default());
    common::subscriber_sees_events_in_order(publisher, "op-tail").await;
}

fn any_status() -> impl Strategy<Value = AgentStatus> {
    prop_oneof![
        Just(AgentStatus::Idle),
        Just(AgentStatus::Running),
        Just(AgentStatus::WaitingForHuman),
        Just(AgentStatus::Done),
        Just(AgentStatus::Error),
        Just(AgentStatus::Interrupted),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stats_match_saved_statuses(statuses in prop::collection::vec(any_status(), 0..40)) {
        let store = InMemoryStateStore::default();
        let stats = tokio_test::block_on(async {
            for (i, status) in statuses.iter().enumerate() {
                let op = format!("op-{i}");
                let state = AgentState::new(&op).with_status(*status);
                store.save_agent_state(&op, &state).await.unwrap();
            }
            store.get_stats().await.unwrap()
        });

        let active = statuses
            .iter()
            .filter(|s| matches!(s, AgentStatus::Running | AgentStatus::WaitingForHuman))
            .count();
        let completed = statuses.iter().filter(|s| **s == AgentStatus::Done).count();
        let failed = statuses
            .iter()
            .filter(|s| matches!(s, AgentStatus::Error | AgentStatus::Interrupted))
            .count();

        prop_assert_eq!(stats.total_operations, statuses.len());
        prop_assert_eq!(stats.active_operations, active);
        prop_assert_eq!(stats.completed_operations, completed);
        prop_assert_eq!(stats.error_operations, failed);
    }
}
