//! Redis Streams event publisher
//!
//! Each operation owns one stream, `{prefix}_stream:{op}`, trimmed to roughly
//! `max_len` entries with `XADD MAXLEN ~` and expired `ttl` after the last
//! publish. Entry ids are the Redis-assigned `ms-seq` ids, which double as
//! subscriber cursors.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use redis::streams::{StreamId as RedisStreamEntry, StreamRangeReply, StreamReadOptions, StreamReadReply};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use stepline_core::{
    EventPublisher, NewStreamEvent, StoreError, StoreResult, StreamCursor, StreamEvent,
    StreamEventType,
};

use crate::config::StreamConfig;
use crate::redis::error::{pool_error, redis_error};
use crate::redis::{OperationKeys, RedisClientProvider, scan_keys, ttl_secs};

const READ_BATCH: usize = 100;

pub struct RedisEventPublisher {
    pool: Pool,
    keys: OperationKeys,
    config: StreamConfig,
}

impl RedisEventPublisher {
    pub fn new(pool: Pool, key_prefix: &str, config: StreamConfig) -> Self {
        Self {
            pool,
            keys: OperationKeys::new(key_prefix),
            config,
        }
    }

    /// Build on the provider's shared pool; `None` if Redis is unavailable
    pub async fn from_provider(
        provider: &RedisClientProvider,
        config: StreamConfig,
    ) -> Option<Self> {
        let pool = provider.pool().await?;
        let prefix = provider.config()?.key_prefix.clone();
        Some(Self::new(pool, &prefix, config))
    }

    async fn get_connection(&self) -> StoreResult<Connection> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Id of the newest entry, or `0-0` for an empty stream
    async fn last_id(&self, key: &str) -> StoreResult<String> {
        let mut conn = self.get_connection().await?;
        let reply: StreamRangeReply = conn
            .xrevrange_count(key, "+", "-", 1)
            .await
            .map_err(|e| redis_error("XREVRANGE", e))?;
        Ok(reply
            .ids
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .unwrap_or_else(|| "0-0".to_string()))
    }

    /// One bounded blocking read after `last_id`
    async fn read_after(&self, key: &str, last_id: &str) -> StoreResult<Vec<RedisStreamEntry>> {
        let mut conn = self.get_connection().await?;
        let options = StreamReadOptions::default()
            .block(self.config.block.as_millis() as usize)
            .count(READ_BATCH);
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[key], &[last_id], &options)
            .await
            .map_err(|e| redis_error("XREAD", e))?;
        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }
}

fn decode_entry(operation_id: &str, entry: &RedisStreamEntry) -> StoreResult<StreamEvent> {
    let field = |name: &str| -> StoreResult<String> {
        entry
            .get::<String>(name)
            .ok_or_else(|| StoreError::decode(&entry.id, format!("missing field '{name}'")))
    };

    let event_type: StreamEventType = field("type")?.parse()?;
    let step_index = field("stepIndex")?
        .parse::<u32>()
        .map_err(|e| StoreError::decode(&entry.id, e))?;
    let data = serde_json::from_str(&field("data")?).map_err(|e| StoreError::decode(&entry.id, e))?;
    let timestamp = field("timestamp")?
        .parse::<i64>()
        .map_err(|e| StoreError::decode(&entry.id, e))?;

    Ok(StreamEvent {
        id: entry.id.clone(),
        operation_id: operation_id.to_string(),
        step_index,
        event_type,
        data,
        timestamp,
    })
}

fn decode_entries(operation_id: &str, entries: &[RedisStreamEntry]) -> Vec<StreamEvent> {
    entries
        .iter()
        .filter_map(|entry| match decode_entry(operation_id, entry) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(operation_id, id = %entry.id, error = %e, "Skipping malformed stream entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish_stream_event(
        &self,
        operation_id: &str,
        event: NewStreamEvent,
    ) -> StoreResult<String> {
        let key = self.keys.stream(operation_id);
        let data = serde_json::to_string(&event.data)?;
        let timestamp = Utc::now().timestamp_millis();

        let mut conn = self.get_connection().await?;
        let (id,): (String,) = redis::pipe()
            .cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_len)
            .arg("*")
            .arg("type")
            .arg(event.event_type.as_str())
            .arg("stepIndex")
            .arg(event.step_index)
            .arg("operationId")
            .arg(operation_id)
            .arg("data")
            .arg(data)
            .arg("timestamp")
            .arg(timestamp)
            .expire(&key, ttl_secs(self.config.ttl) as i64)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|e| redis_error("XADD", e))?;

        debug!(
            operation_id,
            step_index = event.step_index,
            event_type = %event.event_type,
            id = %id,
            "Published stream event"
        );
        Ok(id)
    }

    async fn subscribe_stream_events(
        &self,
        operation_id: &str,
        from: StreamCursor,
        on_events: &mut (dyn FnMut(Vec<StreamEvent>) + Send),
        cancel: CancellationToken,
    ) -> StoreResult<()> {
        let key = self.keys.stream(operation_id);
        let mut last_id = match from {
            StreamCursor::Latest => self.last_id(&key).await?,
            StreamCursor::Beginning => "0-0".to_string(),
            StreamCursor::After(id) => id.to_string(),
        };
        let mut failures = 0u32;

        debug!(operation_id, cursor = %last_id, "Subscribed to event stream");

        while !cancel.is_cancelled() {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.read_after(&key, &last_id) => read,
            };

            match read {
                Ok(entries) => {
                    failures = 0;
                    if let Some(last) = entries.last() {
                        last_id = last.id.clone();
                    }
                    let events = decode_entries(operation_id, &entries);
                    if !events.is_empty() && !cancel.is_cancelled() {
                        on_events(events);
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        error!(operation_id, attempts = failures, error = %e, "Giving up on event stream");
                        return Err(StoreError::ReadRetriesExhausted {
                            attempts: failures,
                            reason: e.to_string(),
                        });
                    }
                    let delay = self.config.backoff(failures);
                    warn!(
                        operation_id,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stream read failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
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
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.get_connection().await?;
        let reply: StreamRangeReply = conn
            .xrevrange_count(self.keys.stream(operation_id), "+", "-", count)
            .await
            .map_err(|e| redis_error("XREVRANGE", e))?;
        Ok(decode_entries(operation_id, &reply.ids))
    }

    async fn cleanup_operation(&self, operation_id: &str) -> StoreResult<()> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(self.keys.stream(operation_id))
            .await
            .map_err(|e| redis_error("DEL", e))?;
        debug!(operation_id, "Deleted event stream");
        Ok(())
    }

    async fn get_active_operations_count(&self) -> StoreResult<usize> {
        let mut conn = self.get_connection().await?;
        let keys = scan_keys(&mut conn, &self.keys.stream_pattern()).await?;
        Ok(keys
            .iter()
            .filter(|k| self.keys.operation_from_stream(k).is_some())
            .count())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        debug!(status = ?self.pool.status(), "Redis event publisher released");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
