//! In-memory event publisher
//!
//! Mirrors the Redis Streams publisher: per-operation bounded logs, `ms-seq`
//! ids that increase monotonically per operation, and tail-reads that block
//! for at most `block` before re-checking cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use stepline_core::{
    BoundedLog, EventPublisher, NewStreamEvent, StoreResult, StreamCursor, StreamEvent, StreamId,
};

use crate::config::StreamConfig;

/// Upper bound on the time between two expiry sweeps triggered by publishing
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct StreamLog {
    entries: BoundedLog<(StreamId, StreamEvent)>,
    last_id: StreamId,
    last_publish: DateTime<Utc>,
}

impl StreamLog {
    fn new(max_len: usize) -> Self {
        Self {
            entries: BoundedLog::new(max_len),
            last_id: StreamId::ZERO,
            last_publish: Utc::now(),
        }
    }

    fn after(&self, cursor: StreamId) -> Vec<StreamEvent> {
        self.entries
            .iter()
            .filter(|(id, _)| *id > cursor)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

pub struct InMemoryEventPublisher {
    streams: DashMap<String, StreamLog>,
    notifiers: DashMap<String, Arc<Notify>>,
    config: StreamConfig,
    /// Unix millis of the last sweep
    last_sweep: AtomicI64,
}

impl InMemoryEventPublisher {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            streams: DashMap::new(),
            notifiers: DashMap::new(),
            config,
            last_sweep: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn notifier(&self, operation_id: &str) -> Arc<Notify> {
        self.notifiers
            .entry(operation_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn is_expired(&self, log: &StreamLog, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.config.ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(log.last_publish) > ttl
    }

    /// Drop streams that outlived their TTL; returns how many were removed
    ///
    /// Notifiers go with their stream unless a subscriber still holds one.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        self.last_sweep.store(now.timestamp_millis(), Ordering::Relaxed);
        let before = self.streams.len();
        self.streams.retain(|_, log| !self.is_expired(log, now));
        self.notifiers
            .retain(|id, notify| self.streams.contains_key(id) || Arc::strong_count(notify) > 1);
        let removed = before.saturating_sub(self.streams.len());
        if removed > 0 {
            debug!(removed, "Swept expired event streams");
        }
        removed
    }

    fn sweep_if_due(&self, now: DateTime<Utc>) {
        let interval = self.config.ttl.min(MAX_SWEEP_INTERVAL).as_millis() as i64;
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.timestamp_millis() - last >= interval {
            self.sweep_expired();
        }
    }

    /// Number of streams currently held, expired or not
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of wakeup handles currently held
    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    fn current_last_id(&self, operation_id: &str) -> StreamId {
        self.streams
            .get(operation_id)
            .map(|log| log.last_id)
            .unwrap_or(StreamId::ZERO)
    }

    fn read_after(&self, operation_id: &str, cursor: StreamId) -> Vec<StreamEvent> {
        self.streams
            .get(operation_id)
            .map(|log| log.after(cursor))
            .unwrap_or_default()
    }
}

impl Default for InMemoryEventPublisher {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish_stream_event(
        &self,
        operation_id: &str,
        event: NewStreamEvent,
    ) -> StoreResult<String> {
        let now = Utc::now();
        self.sweep_if_due(now);
        let id = {
            let mut log = self
                .streams
                .entry(operation_id.to_string())
                .or_insert_with(|| StreamLog::new(self.config.max_len));
            if self.is_expired(&log, now) {
                log.entries.clear();
            }

            let id = log.last_id.next_after(now.timestamp_millis().max(0) as u64);
            log.last_id = id;
            log.last_publish = now;
            log.entries.push((
                id,
                StreamEvent {
                    id: id.to_string(),
                    operation_id: operation_id.to_string(),
                    step_index: event.step_index,
                    event_type: event.event_type,
                    data: event.data,
                    timestamp: now.timestamp_millis(),
                },
            ));
            id
        };

        self.notifier(operation_id).notify_waiters();
        debug!(
            operation_id,
            step_index = event.step_index,
            event_type = %event.event_type,
            id = %id,
            "Published stream event"
        );
        Ok(id.to_string())
    }

    async fn subscribe_stream_events(
        &self,
        operation_id: &str,
        from: StreamCursor,
        on_events: &mut (dyn FnMut(Vec<StreamEvent>) + Send),
        cancel: CancellationToken,
    ) -> StoreResult<()> {
        let mut cursor = match from {
            StreamCursor::Latest => self.current_last_id(operation_id),
            StreamCursor::Beginning => StreamId::ZERO,
            StreamCursor::After(id) => id,
        };
        let notify = self.notifier(operation_id);

        while !cancel.is_cancelled() {
            // Register interest before reading so a publish in between is not missed
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let events = self.read_after(operation_id, cursor);
            if let Some(last) = events.last().and_then(StreamEvent::stream_id) {
                cursor = last;
                on_events(events);
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.config.block) => {}
            }
        }

        debug!(operation_id, "Event stream subscription cancelled");
        Ok(())
    }

    async fn get_stream_history(
        &self,
        operation_id: &str,
        count: usize,
    ) -> StoreResult<Vec<StreamEvent>> {
        let now = Utc::now();
        Ok(self
            .streams
            .get(operation_id)
            .filter(|log| !self.is_expired(log, now))
            .map(|log| {
                log.entries
                    .latest_rev(count)
                    .into_iter()
                    .map(|(_, event)| event)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cleanup_operation(&self, operation_id: &str) -> StoreResult<()> {
        self.streams.remove(operation_id);
        if let Some((_, notify)) = self.notifiers.remove(operation_id) {
            notify.notify_waiters();
        }
        debug!(operation_id, "Deleted event stream");
        Ok(())
    }

    async fn get_active_operations_count(&self) -> StoreResult<usize> {
        self.sweep_expired();
        Ok(self
            .streams
            .iter()
            .filter(|entry| !entry.value().entries.is_empty())
            .count())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.streams.clear();
        for entry in self.notifiers.iter() {
            entry.value().notify_waiters();
        }
        self.notifiers.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use stepline_core::{StreamChunk, StreamEventType};

    fn event(step: u32) -> NewStreamEvent {
        NewStreamEvent::new(StreamEventType::StepStart, step, json!({ "step": step }))
    }

    #[tokio::test]
    async fn ids_increase_per_operation() {
        let publisher = InMemoryEventPublisher::default();
        let mut previous = StreamId::ZERO;
        for i in 0..50 {
            let id: StreamId = publisher
                .publish_stream_event("op-1", event(i))
                .await
                .unwrap()
                .parse()
                .unwrap();
            assert!(id > previous);
            previous = id;
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_capped() {
        let publisher = InMemoryEventPublisher::new(StreamConfig::default().with_max_len(10));
        for i in 0..15 {
            publisher.publish_stream_event("op-1", event(i)).await.unwrap();
        }
        let history = publisher.get_stream_history("op-1", 100).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].step_index, 14);
        assert_eq!(history[9].step_index, 5);

        let latest = publisher.get_stream_history("op-1", 3).await.unwrap();
        let steps: Vec<u32> = latest.iter().map(|e| e.step_index).collect();
        assert_eq!(steps, vec![14, 13, 12]);
    }

    #[tokio::test]
    async fn chunk_wrapper_publishes_stream_chunk() {
        let publisher = InMemoryEventPublisher::default();
        publisher
            .publish_stream_chunk("op-1", 2, &StreamChunk::text("Hel"))
            .await
            .unwrap();
        let history = publisher.get_stream_history("op-1", 1).await.unwrap();
        assert_eq!(history[0].event_type, StreamEventType::StreamChunk);
        assert_eq!(history[0].data["chunkType"], "text");
        assert_eq!(history[0].data["content"], "Hel");
    }

    #[tokio::test]
    async fn subscriber_from_beginning_replays_then_tails() {
        let publisher = Arc::new(InMemoryEventPublisher::new(
            StreamConfig::default().with_block(Duration::from_millis(50)),
        ));
        publisher.publish_stream_event("op-1", event(0)).await.unwrap();

        let cancel = CancellationToken::new();
        let reader = {
            let publisher = publisher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                let mut sink = |batch: Vec<StreamEvent>| {
                    seen.extend(batch.into_iter().map(|e| e.step_index));
                    if seen.len() >= 3 {
                        cancel.cancel();
                    }
                };
                publisher
                    .subscribe_stream_events("op-1", StreamCursor::Beginning, &mut sink, cancel.clone())
                    .await
                    .unwrap();
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish_stream_event("op-1", event(1)).await.unwrap();
        publisher.publish_stream_event("op-1", event(2)).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn latest_cursor_skips_existing_events() {
        let publisher = Arc::new(InMemoryEventPublisher::new(
            StreamConfig::default().with_block(Duration::from_millis(20)),
        ));
        publisher.publish_stream_event("op-1", event(0)).await.unwrap();

        let cancel = CancellationToken::new();
        let reader = {
            let publisher = publisher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                let mut sink = |batch: Vec<StreamEvent>| {
                    seen.extend(batch.into_iter().map(|e| e.step_index));
                    cancel.cancel();
                };
                publisher
                    .subscribe_stream_events("op-1", StreamCursor::Latest, &mut sink, cancel.clone())
                    .await
                    .unwrap();
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        publisher.publish_stream_event("op-1", event(7)).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec![7]);
    }

    #[tokio::test]
    async fn cancellation_ends_idle_subscription_promptly() {
        let publisher = InMemoryEventPublisher::new(
            StreamConfig::default().with_block(Duration::from_secs(30)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut sink = |_: Vec<StreamEvent>| {};
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            publisher.subscribe_stream_events("op-1", StreamCursor::Latest, &mut sink, cancel),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn sweep_drops_expired_streams_and_notifiers() {
        let publisher =
            InMemoryEventPublisher::new(StreamConfig::default().with_ttl(Duration::from_millis(1)));
        for i in 0..100 {
            publisher
                .publish_stream_event(&format!("op-{i}"), event(0))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        publisher.sweep_expired();
        assert_eq!(publisher.stream_count(), 0);
        assert_eq!(publisher.notifier_count(), 0);
    }

    #[tokio::test]
    async fn publishing_sweeps_other_expired_streams() {
        let publisher =
            InMemoryEventPublisher::new(StreamConfig::default().with_ttl(Duration::from_millis(5)));
        publisher.publish_stream_event("op-old", event(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        publisher.publish_stream_event("op-new", event(0)).await.unwrap();
        assert_eq!(publisher.stream_count(), 1);
        assert_eq!(publisher.notifier_count(), 1);
        assert!(publisher.get_stream_history("op-old", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_keeps_notifier_held_by_subscriber() {
        let publisher = Arc::new(InMemoryEventPublisher::new(
            StreamConfig::default()
                .with_ttl(Duration::from_millis(1))
                .with_block(Duration::from_millis(10)),
        ));
        let cancel = CancellationToken::new();
        let reader = {
            let publisher = publisher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut sink = |_: Vec<StreamEvent>| {};
                publisher
                    .subscribe_stream_events("op-idle", StreamCursor::Latest, &mut sink, cancel)
                    .await
                    .unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        publisher.sweep_expired();
        assert_eq!(publisher.notifier_count(), 1);

        cancel.cancel();
        reader.await.unwrap();
        publisher.sweep_expired();
        assert_eq!(publisher.notifier_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_drops_stream() {
        let publisher = InMemoryEventPublisher::default();
        publisher.publish_stream_event("op-1", event(0)).await.unwrap();
        publisher.publish_stream_event("op-2", event(0)).await.unwrap();
        assert_eq!(publisher.get_active_operations_count().await.unwrap(), 2);

        publisher.cleanup_operation("op-1").await.unwrap();
        assert_eq!(publisher.get_active_operations_count().await.unwrap(), 1);
        assert!(publisher.get_stream_history("op-1", 10).await.unwrap().is_empty());
    }
}
