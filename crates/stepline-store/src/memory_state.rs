//! In-memory state store
//!
//! A first-class local mode, not just a test double. Values are cloned on the
//! way in and on the way out so no caller ever holds a reference into the map.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::multiple::RefMulti;
use dashmap::mapref::one::{Ref, RefMut};
use tracing::{debug, info};

use stepline_core::{
    AgentState, BoundedLog, CreateOperationParams, EventBatch, OperationMetadata, OperationStats,
    StateStore, StepRecord, StepResult, StoreResult,
};

use crate::config::{MEMORY_OPERATION_TTL, StoreConfig};

#[derive(Debug)]
struct OperationRecord {
    state: Option<AgentState>,
    metadata: Option<OperationMetadata>,
    steps: BoundedLog<StepRecord>,
    events: BoundedLog<EventBatch>,
}

impl OperationRecord {
    fn new(history_limit: usize) -> Self {
        Self {
            state: None,
            metadata: None,
            steps: BoundedLog::new(history_limit),
            events: BoundedLog::new(history_limit),
        }
    }

    fn refresh_metadata(&mut self, operation_id: &str, state: &AgentState) {
        let metadata = self.metadata.get_or_insert_with(|| {
            OperationMetadata::new(
                operation_id,
                CreateOperationParams {
                    user_id: state.metadata.user_id.clone(),
                    ..Default::default()
                },
            )
        });
        metadata.refresh_from(state);
    }

    fn last_active(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .as_ref()
            .map(|m| m.last_active_at)
            .or_else(|| self.state.as_ref().map(|s| s.last_modified))
    }

    /// Idle for longer than `ttl`, or never written to
    fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.last_active() {
            Some(last) => now.signed_duration_since(last) > ttl,
            None => true,
        }
    }
}

pub struct InMemoryStateStore {
    operations: DashMap<String, OperationRecord>,
    ttl: Duration,
    history_limit: usize,
}

impl InMemoryStateStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            operations: DashMap::new(),
            ttl: config.ttl_or(MEMORY_OPERATION_TTL),
            history_limit: config.history_limit,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of operations currently held
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn chrono_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Record for reading; expired records read as absent until swept
    fn live(&self, operation_id: &str) -> Option<Ref<'_, String, OperationRecord>> {
        let ttl = self.chrono_ttl();
        let now = Utc::now();
        self.operations
            .get(operation_id)
            .filter(|record| !record.is_expired(ttl, now))
    }

    /// Record for writing; an expired record is replaced by a fresh one
    fn live_mut(&self, operation_id: &str) -> RefMut<'_, String, OperationRecord> {
        let ttl = self.chrono_ttl();
        let now = Utc::now();
        let mut record = self
            .operations
            .entry(operation_id.to_string())
            .or_insert_with(|| OperationRecord::new(self.history_limit));
        let written = record.metadata.is_some() || record.state.is_some();
        if written && record.is_expired(ttl, now) {
            debug!(operation_id, "Replacing expired operation record");
            *record = OperationRecord::new(self.history_limit);
        }
        record
    }

    /// Unexpired records only
    fn live_records(&self) -> impl Iterator<Item = RefMulti<'_, String, OperationRecord>> {
        let ttl = self.chrono_ttl();
        let now = Utc::now();
        self.operations
            .iter()
            .filter(move |entry| !entry.value().is_expired(ttl, now))
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_operation_metadata(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> StoreResult<()> {
        let mut record = self.live_mut(operation_id);
        record.metadata = Some(OperationMetadata::new(operation_id, params));
        debug!(operation_id, "Created operation metadata");
        Ok(())
    }

    async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> StoreResult<()> {
        let mut record = self.live_mut(operation_id);
        record.state = Some(state.clone());
        record.refresh_metadata(operation_id, state);
        debug!(operation_id, status = %state.status, step_count = state.step_count, "Saved agent state");
        Ok(())
    }

    async fn load_agent_state(&self, operation_id: &str) -> StoreResult<Option<AgentState>> {
        Ok(self.live(operation_id).and_then(|record| record.state.clone()))
    }

    async fn save_step_result(&self, operation_id: &str, result: &StepResult) -> StoreResult<()> {
        // One entry guard covers every write, so readers never see a torn update
        let mut record = self.live_mut(operation_id);
        record.state = Some(result.new_state.clone());
        record.steps.push(StepRecord::from(result));
        record.events.push(EventBatch::from(result));
        record.refresh_metadata(operation_id, &result.new_state);
        debug!(
            operation_id,
            step_index = result.step_index,
            status = %result.new_state.status,
            "Saved step result"
        );
        Ok(())
    }

    async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StepRecord>> {
        Ok(self
            .live(operation_id)
            .map(|record| record.steps.latest(limit))
            .unwrap_or_default())
    }

    async fn get_step_events(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<EventBatch>> {
        Ok(self
            .live(operation_id)
            .map(|record| record.events.latest(limit))
            .unwrap_or_default())
    }

    async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> StoreResult<Option<OperationMetadata>> {
        Ok(self.live(operation_id).and_then(|record| record.metadata.clone()))
    }

    async fn get_active_operations(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .live_records()
            .filter(|entry| entry.value().metadata.is_some())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_stats(&self) -> StoreResult<OperationStats> {
        Ok(OperationStats::from_statuses(
            self.live_records()
                .filter_map(|entry| entry.value().metadata.as_ref().map(|m| m.status)),
        ))
    }

    async fn delete_agent_operation(&self, operation_id: &str) -> StoreResult<()> {
        self.operations.remove(operation_id);
        debug!(operation_id, "Deleted operation state");
        Ok(())
    }

    async fn cleanup_expired_operations(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let ttl = self.chrono_ttl();
        let before = self.operations.len();

        self.operations.retain(|_, record| !record.is_expired(ttl, now));

        let removed = before.saturating_sub(self.operations.len());
        if removed > 0 {
            info!(removed, "Cleaned up expired operations");
        }
        Ok(removed)
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.operations.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
