//! Redis connection configuration
//!
//! ## Environment Variables
//!
//! - `STEPLINE_REDIS_URL` (falls back to `REDIS_URL`) - Connection URL; unset means Redis is unconfigured
//! - `STEPLINE_REDIS_POOL_SIZE` - Connection pool size, 1..=100 (default: 10)
//! - `STEPLINE_REDIS_CONNECT_TIMEOUT` - Connection timeout (default: 5s)
//! - `STEPLINE_REDIS_KEY_PREFIX` - Key namespace (default: `agent_runtime`)

use std::time::Duration;

use crate::config::{ConfigError, get_env_duration, get_env_string, get_env_usize};

/// Default key namespace for every per-operation key
pub const DEFAULT_KEY_PREFIX: &str = "agent_runtime";

#[derive(Debug, Clone, PartialEq)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    pub pool_size: usize,
    /// Bound on pool checkout and the initial PING
    pub connect_timeout: Duration,
    /// Prefix for per-operation keys
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(5),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Read the configuration from the environment.
    ///
    /// Returns `Ok(None)` when no URL is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is malformed or validation fails
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(url) =
            get_env_string("STEPLINE_REDIS_URL").or_else(|| get_env_string("REDIS_URL"))
        else {
            return Ok(None);
        };

        let mut config = Self::new(url.trim());
        if let Some(size) = get_env_usize("STEPLINE_REDIS_POOL_SIZE")? {
            config.pool_size = size;
        }
        if let Some(timeout) = get_env_duration("STEPLINE_REDIS_CONNECT_TIMEOUT")? {
            config.connect_timeout = timeout;
        }
        if let Some(prefix) = get_env_string("STEPLINE_REDIS_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "Redis URL cannot be empty".to_string(),
            ));
        }
        if !(self.url.starts_with("redis://")
            || self.url.starts_with("rediss://")
            || self.url.starts_with("redis+unix://")
            || self.url.starts_with("unix://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "Unsupported Redis URL scheme in '{}'",
                redact_url(&self.url)
            )));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "Pool size cannot be zero".to_string(),
            ));
        }
        if self.pool_size > 100 {
            return Err(ConfigError::ValidationError(
                "Pool size too large (max 100)".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "Connect timeout must be non-zero".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "Key prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Strip credentials from a URL before it reaches a log line
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
