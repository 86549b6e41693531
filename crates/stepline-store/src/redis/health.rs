//! Redis health reporting

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health status for the shared Redis connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisHealth {
    /// Redis is configured at all
    pub configured: bool,
    /// Last PING succeeded
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub pool_stats: Option<PoolStats>,
    /// `redis_version` from `INFO server`
    pub server_version: Option<String>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl RedisHealth {
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            healthy: false,
            latency_ms: None,
            pool_stats: None,
            server_version: None,
            error: Some("Redis is not configured".to_string()),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            configured: true,
            error: Some(error.into()),
            ..Self::unconfigured()
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub max_size: usize,
    /// Connections currently open
    pub size: usize,
    /// Idle connections ready for checkout
    pub available: usize,
    /// Tasks waiting for a connection
    pub waiting: usize,
}

impl From<deadpool_redis::Status> for PoolStats {
    fn from(status: deadpool_redis::Status) -> Self {
        Self {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// Pull `redis_version` out of an `INFO server` reply
pub(crate) fn parse_server_version(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("redis_version:"))
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_version_extracted() {
        let info = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n";
        assert_eq!(parse_server_version(info).as_deref(), Some("7.2.4"));
        assert_eq!(parse_server_version("# Server\r\n"), None);
    }

    #[test]
    fn unhealthy_is_configured() {
        let health = RedisHealth::unhealthy("PING failed");
        assert!(health.configured);
        assert!(!health.healthy);
    }
}
