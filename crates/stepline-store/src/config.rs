//! Store and stream configuration with environment variable support
//!
//! ## Environment Variables
//!
//! - `STEPLINE_OPERATION_TTL` - Retention for inactive operations (default: 2h Redis, 1h memory)
//! - `STEPLINE_HISTORY_LIMIT` - Cap of the step-history and events logs (default: 200)
//! - `STEPLINE_STREAM_MAX_LEN` - Approximate cap of each event stream (default: 1000)
//! - `STEPLINE_STREAM_TTL` - Expiry refreshed on each publish (default: 1h)
//! - `STEPLINE_STREAM_BLOCK` - Blocking read timeout for subscribers (default: 1s)
//! - `STEPLINE_STREAM_MAX_RETRIES` - Consecutive read failures tolerated (default: 5)
//!
//! Durations accept humantime strings such as `90s`, `2h` or `500ms`.

use std::{env, time::Duration};

use stepline_core::{DEFAULT_HISTORY_LIMIT, DEFAULT_STREAM_MAX_LEN};

/// Error type for configuration loading
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Retention of operations in the persisted store
pub const REDIS_OPERATION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Retention of operations in the in-memory store
pub const MEMORY_OPERATION_TTL: Duration = Duration::from_secs(60 * 60);

/// Settings shared by both state store backends
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Overrides the backend's default retention when set
    pub operation_ttl: Option<Duration>,
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_ttl: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl StoreConfig {
    pub fn with_operation_ttl(mut self, ttl: Duration) -> Self {
        self.operation_ttl = Some(ttl);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Effective TTL for a backend whose default is `fallback`
    pub fn ttl_or(&self, fallback: Duration) -> Duration {
        self.operation_ttl.unwrap_or(fallback)
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ttl) = get_env_duration("STEPLINE_OPERATION_TTL")? {
            config.operation_ttl = Some(ttl);
        }
        if let Some(limit) = get_env_usize("STEPLINE_HISTORY_LIMIT")? {
            config.history_limit = limit;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "history_limit must be greater than 0".to_string(),
            ));
        }
        if self.operation_ttl.is_some_and(|ttl| ttl.as_secs() == 0) {
            return Err(ConfigError::ValidationError(
                "operation_ttl must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the per-operation event streams
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub max_len: usize,
    pub ttl: Duration,
    /// How long one tail-read blocks before re-checking cancellation
    pub block: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubles per consecutive failure
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_STREAM_MAX_LEN,
            ttl: Duration::from_secs(60 * 60),
            block: Duration::from_secs(1),
            max_retries: 5,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    /// Exponential backoff for the `attempt`-th consecutive failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(max_len) = get_env_usize("STEPLINE_STREAM_MAX_LEN")? {
            config.max_len = max_len;
        }
        if let Some(ttl) = get_env_duration("STEPLINE_STREAM_TTL")? {
            config.ttl = ttl;
        }
        if let Some(block) = get_env_duration("STEPLINE_STREAM_BLOCK")? {
            config.block = block;
        }
        if let Some(retries) = get_env_u32("STEPLINE_STREAM_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_len == 0 {
            return Err(ConfigError::ValidationError(
                "stream max_len must be greater than 0".to_string(),
            ));
        }
        if self.block.is_zero() {
            return Err(ConfigError::ValidationError(
                "stream block timeout must be non-zero".to_string(),
            ));
        }
        if self.ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationError(
                "stream ttl must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    match get_env_string(key) {
        Some(val) => val
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u32 value '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

pub fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match get_env_string(key) {
        Some(val) => val
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

pub fn get_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match get_env_string(key) {
        Some(val) => humantime::parse_duration(val.trim())
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid duration '{val}': {e}"),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 400)]
    #[case(7, 5000)]
    #[case(40, 5000)]
    fn backoff_doubles_and_caps(#[case] attempt: u32, #[case] expected_ms: u64) {
        let config = StreamConfig::default();
        assert_eq!(config.backoff(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StreamConfig::default().validate().is_ok());
        assert_eq!(StoreConfig::default().ttl_or(REDIS_OPERATION_TTL), REDIS_OPERATION_TTL);
    }

    #[test]
    fn zero_limits_rejected() {
        let err = StoreConfig::default().with_history_limit(0).validate();
        assert!(matches!(err, Err(ConfigError::ValidationError(_))));

        let err = StreamConfig::default().with_max_len(0).validate();
        assert!(matches!(err, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn ttl_override_wins() {
        let config = StoreConfig::default().with_operation_ttl(Duration::from_secs(60));
        assert_eq!(config.ttl_or(MEMORY_OPERATION_TTL), Duration::from_secs(60));
    }
}
