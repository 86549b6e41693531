//! Redis-backed state store
//!
//! Layout per operation (all keys share one expiry, refreshed on every write):
//!
//! - `{prefix}_state:{op}` - latest [`AgentState`] as JSON
//! - `{prefix}_steps:{op}` - list of [`StepRecord`]s, newest at the head
//! - `{prefix}_events:{op}` - list of [`EventBatch`]es, newest at the head
//! - `{prefix}_meta:{op}` - [`OperationMetadata`] hash
//!
//! `save_step_result` writes all four in one MULTI/EXEC transaction.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use stepline_core::{
    AgentState, AgentStatus, CreateOperationParams, EventBatch, OperationMetadata, OperationStats,
    StateStore, StepRecord, StepResult, StoreError, StoreResult,
};

use crate::config::{ConfigError, REDIS_OPERATION_TTL, StoreConfig};
use crate::redis::error::{pool_error, redis_error};
use crate::redis::{OperationKeys, RedisClientProvider, scan_keys, ttl_secs};

pub struct RedisStateStore {
    pool: Pool,
    keys: OperationKeys,
    ttl: Duration,
    history_limit: usize,
}

impl RedisStateStore {
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` does not validate
    pub fn new(pool: Pool, key_prefix: &str, config: &StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            pool,
            keys: OperationKeys::new(key_prefix),
            ttl: config.ttl_or(REDIS_OPERATION_TTL),
            history_limit: config.history_limit,
        })
    }

    /// Build on the provider's shared pool; `None` if Redis is unavailable or
    /// `config` is invalid
    pub async fn from_provider(
        provider: &RedisClientProvider,
        config: &StoreConfig,
    ) -> Option<Self> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Invalid store configuration");
            return None;
        }
        let pool = provider.pool().await?;
        let prefix = provider.config()?.key_prefix.clone();
        Self::new(pool, &prefix, config).ok()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get_connection(&self) -> StoreResult<Connection> {
        self.pool.get().await.map_err(pool_error)
    }

    fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
        serde_json::from_str(raw).map_err(|e| StoreError::decode(key, e))
    }

    async fn read_list<T: DeserializeOwned>(&self, key: &str, limit: usize) -> StoreResult<Vec<T>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn
            .lrange(key, 0, list_end(limit))
            .await
            .map_err(|e| redis_error("LRANGE", e))?;

        // Lists are newest-first; callers want oldest-first
        let mut items = Vec::with_capacity(raw.len());
        for entry in raw.iter().rev() {
            match Self::decode(key, entry) {
                Ok(item) => items.push(item),
                Err(e) => warn!(key, error = %e, "Skipping undecodable history entry"),
            }
        }
        Ok(items)
    }

    async fn delete_keys(&self, conn: &mut Connection, operation_id: &str) -> StoreResult<()> {
        let keys = self.keys.all_state_keys(operation_id);
        conn.del::<_, ()>(&keys[..])
            .await
            .map_err(|e| redis_error("DEL", e))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn create_operation_metadata(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> StoreResult<()> {
        let metadata = OperationMetadata::new(operation_id, params);
        let fields = metadata_to_fields(&metadata)?;
        let key = self.keys.meta(operation_id);

        let mut conn = self.get_connection().await?;
        redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields[..])
            .ignore()
            .expire(&key, ttl_secs(self.ttl) as i64)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| redis_error("create metadata", e))?;

        debug!(operation_id, "Created operation metadata");
        Ok(())
    }

    async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> StoreResult<()> {
        let json = serde_json::to_string(state)?;
        let mut conn = self.get_connection().await?;

        conn.set_ex::<_, _, ()>(self.keys.state(operation_id), json, ttl_secs(self.ttl))
            .await
            .map_err(|e| redis_error("save state", e))?;

        // Metadata is a derived index: never fail the primary write over it
        let meta_key = self.keys.meta(operation_id);
        let refresh = redis::pipe()
            .atomic()
            .hset_multiple(&meta_key, &refresh_fields(state)[..])
            .ignore()
            .expire(&meta_key, ttl_secs(self.ttl) as i64)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await;
        if let Err(e) = refresh {
            warn!(operation_id, error = %e, "Failed to refresh operation metadata");
        }

        debug!(operation_id, status = %state.status, step_count = state.step_count, "Saved agent state");
        Ok(())
    }

    async fn load_agent_state(&self, operation_id: &str) -> StoreResult<Option<AgentState>> {
        let key = self.keys.state(operation_id);
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.get(&key).await.map_err(|e| redis_error("GET", e))?;
        raw.map(|json| Self::decode(&key, &json)).transpose()
    }

    async fn save_step_result(&self, operation_id: &str, result: &StepResult) -> StoreResult<()> {
        let state_json = serde_json::to_string(&result.new_state)?;
        let record_json = serde_json::to_string(&StepRecord::from(result))?;
        let batch_json = serde_json::to_string(&EventBatch::from(result))?;

        let ttl = ttl_secs(self.ttl);
        let trim_to = list_end(self.history_limit);
        let steps_key = self.keys.steps(operation_id);
        let events_key = self.keys.events(operation_id);
        let meta_key = self.keys.meta(operation_id);

        let mut conn = self.get_connection().await?;
        redis::pipe()
            .atomic()
            .set_ex(self.keys.state(operation_id), state_json, ttl)
            .ignore()
            .lpush(&steps_key, record_json)
            .ignore()
            .ltrim(&steps_key, 0, trim_to)
            .ignore()
            .expire(&steps_key, ttl as i64)
            .ignore()
            .lpush(&events_key, batch_json)
            .ignore()
            .ltrim(&events_key, 0, trim_to)
            .ignore()
            .expire(&events_key, ttl as i64)
            .ignore()
            .hset_multiple(&meta_key, &refresh_fields(&result.new_state)[..])
            .ignore()
            .expire(&meta_key, ttl as i64)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| redis_error("save step result", e))?;

        debug!(
            operation_id,
            step_index = result.step_index,
            status = %result.new_state.status,
            events = result.events.len(),
            "Saved step result"
        );
        Ok(())
    }

    async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StepRecord>> {
        self.read_list(&self.keys.steps(operation_id), limit).await
    }

    async fn get_step_events(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<EventBatch>> {
        self.read_list(&self.keys.events(operation_id), limit).await
    }

    async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> StoreResult<Option<OperationMetadata>> {
        let key = self.keys.meta(operation_id);
        let mut conn = self.get_connection().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| redis_error("HGETALL", e))?;
        metadata_from_fields(&key, operation_id, &fields)
    }

    async fn get_active_operations(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let keys = scan_keys(&mut conn, &self.keys.meta_pattern()).await?;
        Ok(keys
            .iter()
            .filter_map(|k| self.keys.operation_from_meta(k))
            .collect())
    }

    async fn get_stats(&self) -> StoreResult<OperationStats> {
        let mut conn = self.get_connection().await?;
        let keys = scan_keys(&mut conn, &self.keys.meta_pattern()).await?;
        if keys.is_empty() {
            return Ok(OperationStats::default());
        }

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.hget(key, "status");
        }
        let statuses: Vec<Option<String>> = pipe
            .query_async(&mut *conn)
            .await
            .map_err(|e| redis_error("HGET status", e))?;

        // Keys that expired between SCAN and HGET come back as nil
        Ok(OperationStats::from_statuses(
            statuses
                .iter()
                .flatten()
                .filter_map(|s| AgentStatus::parse(s)),
        ))
    }

    async fn delete_agent_operation(&self, operation_id: &str) -> StoreResult<()> {
        let mut conn = self.get_connection().await?;
        self.delete_keys(&mut conn, operation_id).await?;
        debug!(operation_id, "Deleted operation state");
        Ok(())
    }

    async fn cleanup_expired_operations(&self) -> StoreResult<usize> {
        let mut conn = self.get_connection().await?;
        let keys = scan_keys(&mut conn, &self.keys.meta_pattern()).await?;
        let now = Utc::now();
        let mut removed = 0;

        for key in keys {
            let Some(operation_id) = self.keys.operation_from_meta(&key) else {
                continue;
            };
            let last_active: Option<String> = conn
                .hget(&key, "lastActiveAt")
                .await
                .map_err(|e| redis_error("HGET lastActiveAt", e))?;
            let expired = match last_active.as_deref().map(DateTime::parse_from_rfc3339) {
                Some(Ok(ts)) => {
                    let idle = now.signed_duration_since(ts.with_timezone(&Utc));
                    idle.to_std().is_ok_and(|idle| idle > self.ttl)
                }
                // Unreadable timestamp: the record is unusable anyway
                Some(Err(_)) => true,
                None => false,
            };
            if expired {
                self.delete_keys(&mut conn, &operation_id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up expired operations");
        }
        Ok(removed)
    }

    async fn disconnect(&self) -> StoreResult<()> {
        // The pool is shared with the publisher; closing it here would strand
        // the other half of the coordinator.
        debug!(status = ?self.pool.status(), "Redis state store released");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Fields refreshed whenever a new snapshot is written
/// Inclusive end index covering the first `len` list entries, at least one
fn list_end(len: usize) -> isize {
    isize::try_from(len.max(1)).map_or(isize::MAX, |n| n - 1)
}

fn refresh_fields(state: &AgentState) -> Vec<(&'static str, String)> {
    vec![
        ("lastActiveAt", Utc::now().to_rfc3339()),
        ("status", state.status.as_str().to_string()),
        ("totalCost", state.cost.total.to_string()),
        ("totalSteps", state.step_count.to_string()),
    ]
}

fn metadata_to_fields(meta: &OperationMetadata) -> StoreResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("operationId", meta.operation_id.clone()),
        ("createdAt", meta.created_at.to_rfc3339()),
        ("lastActiveAt", meta.last_active_at.to_rfc3339()),
        ("status", meta.status.as_str().to_string()),
        ("totalCost", meta.total_cost.to_string()),
        ("totalSteps", meta.total_steps.to_string()),
    ];
    if let Some(user_id) = &meta.user_id {
        fields.push(("userId", user_id.clone()));
    }
    if let Some(config) = &meta.agent_config {
        fields.push(("agentConfig", serde_json::to_string(config)?));
    }
    if let Some(config) = &meta.model_runtime_config {
        fields.push(("modelRuntimeConfig", serde_json::to_string(config)?));
    }
    Ok(fields)
}

fn metadata_from_fields(
    key: &str,
    operation_id: &str,
    fields: &HashMap<String, String>,
) -> StoreResult<Option<OperationMetadata>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let timestamp = |name: &str| -> StoreResult<Option<DateTime<Utc>>> {
        fields
            .get(name)
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| StoreError::decode(key, format!("{name}: {e}")))
            })
            .transpose()
    };
    let json = |name: &str| -> StoreResult<Option<serde_json::Value>> {
        fields
            .get(name)
            .map(|raw| serde_json::from_str(raw).map_err(|e| StoreError::decode(key, e)))
            .transpose()
    };

    let last_active_at = timestamp("lastActiveAt")?.unwrap_or_else(Utc::now);
    let status = match fields.get("status") {
        Some(raw) => AgentStatus::parse(raw)
            .ok_or_else(|| StoreError::decode(key, format!("unknown status '{raw}'")))?,
        None => AgentStatus::Idle,
    };

    Ok(Some(OperationMetadata {
        operation_id: fields
            .get("operationId")
            .cloned()
            .unwrap_or_else(|| operation_id.to_string()),
        created_at: timestamp("createdAt")?.unwrap_or(last_active_at),
        last_active_at,
        status,
        total_cost: fields
            .get("totalCost")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0),
        total_steps: fields
            .get("totalSteps")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        user_id: fields.get("userId").cloned(),
        agent_config: json("agentConfig")?,
        model_runtime_config: json("modelRuntimeConfig")?,
    }))
}
