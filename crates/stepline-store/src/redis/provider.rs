//! Lazily constructed, process-wide Redis connection pool
//!
//! The provider never fails loudly: when Redis is unconfigured or unreachable
//! [`RedisClientProvider::pool`] yields `None` and callers fall back to the
//! in-memory backends.

use std::sync::OnceLock;
use std::time::Instant;

use deadpool_redis::{Config as PoolConfig, Pool, PoolConfig as PoolSizing, Runtime};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::{RedisConfig, redact_url};
use super::error::{pool_error, redis_error};
use super::health::{PoolStats, RedisHealth, parse_server_version};
use stepline_core::{StoreError, StoreResult};

pub struct RedisClientProvider {
    config: Option<RedisConfig>,
    pool: OnceCell<Option<Pool>>,
}

static GLOBAL: OnceLock<RedisClientProvider> = OnceLock::new();

impl RedisClientProvider {
    pub fn new(config: Option<RedisConfig>) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    /// Build from `STEPLINE_REDIS_*` variables; malformed settings count as unconfigured
    pub fn from_env() -> Self {
        match RedisConfig::from_env() {
            Ok(config) => Self::new(config),
            Err(e) => {
                warn!(error = %e, "Ignoring invalid Redis configuration");
                Self::new(None)
            }
        }
    }

    /// Process-wide provider, initialised from the environment on first use
    pub fn global() -> &'static RedisClientProvider {
        GLOBAL.get_or_init(Self::from_env)
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&RedisConfig> {
        self.config.as_ref()
    }

    /// Shared pool, created and probed exactly once
    pub async fn pool(&self) -> Option<Pool> {
        self.pool
            .get_or_init(|| async {
                let config = self.config.as_ref()?;
                match connect(config).await {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        warn!(
                            url = %redact_url(&config.url),
                            error = %e,
                            "Redis unavailable, falling back to in-memory backends"
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// PING the server and report pool statistics
    pub async fn health_check(&self) -> RedisHealth {
        let Some(config) = &self.config else {
            return RedisHealth::unconfigured();
        };
        let Some(pool) = self.pool().await else {
            return RedisHealth::unhealthy("Redis pool could not be created");
        };

        let start = Instant::now();
        let probe = async {
            let mut conn = pool.get().await.map_err(pool_error)?;
            redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .map_err(|e| redis_error("PING", e))?;
            let latency = start.elapsed();
            let info: Option<String> = redis::cmd("INFO")
                .arg("server")
                .query_async(&mut *conn)
                .await
                .ok();
            Ok::<_, StoreError>((latency, info))
        };

        match timeout(config.connect_timeout, probe).await {
            Ok(Ok((latency, info))) => RedisHealth {
                configured: true,
                healthy: true,
                latency_ms: Some(latency.as_millis() as u64),
                pool_stats: Some(PoolStats::from(pool.status())),
                server_version: info.as_deref().and_then(parse_server_version),
                error: None,
                checked_at: chrono::Utc::now(),
            },
            Ok(Err(e)) => RedisHealth {
                pool_stats: Some(PoolStats::from(pool.status())),
                ..RedisHealth::unhealthy(e.to_string())
            },
            Err(_) => RedisHealth::unhealthy("Health check timed out"),
        }
    }
}

async fn connect(config: &RedisConfig) -> StoreResult<Pool> {
    let mut pool_config = PoolConfig::from_url(&config.url);
    pool_config.pool = Some(PoolSizing::new(config.pool_size));

    let pool = pool_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::ConnectionFailed(format!("Failed to create connection pool: {e}")))?;

    let ping = async {
        let mut conn = pool.get().await.map_err(pool_error)?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| redis_error("PING", e))
    };
    timeout(config.connect_timeout, ping).await.map_err(|_| {
        StoreError::ConnectionFailed(format!(
            "PING timed out after {}",
            humantime::format_duration(config.connect_timeout)
        ))
    })??;

    info!(
        url = %redact_url(&config.url),
        pool_size = config.pool_size,
        "Redis connection pool ready"
    );
    debug!(key_prefix = %config.key_prefix, "Redis key namespace");
    Ok(pool)
}
