//! Runtime settings
//!
//! ## Environment Variables
//!
//! - `STEPLINE_STREAM_BUFFER_INTERVAL` - Coalescing window for LLM deltas (default: 50ms)
//! - `STEPLINE_MAX_SYNC_STEPS` - Safety cap for `execute_sync` loops (default: 9999)

use std::time::Duration;

use stepline_store::config::{ConfigError, get_env_duration, get_env_u32};

pub const DEFAULT_BUFFER_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_SYNC_STEPS: u32 = 9999;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// How long text/reasoning deltas are held before one chunk is published
    pub buffer_interval: Duration,
    /// Upper bound on steps a single `execute_sync` call may run
    pub max_sync_steps: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_interval: DEFAULT_BUFFER_INTERVAL,
            max_sync_steps: DEFAULT_MAX_SYNC_STEPS,
        }
    }
}

impl RuntimeConfig {
    pub fn with_buffer_interval(mut self, interval: Duration) -> Self {
        self.buffer_interval = interval;
        self
    }

    pub fn with_max_sync_steps(mut self, steps: u32) -> Self {
        self.max_sync_steps = steps;
        self
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(interval) = get_env_duration("STEPLINE_STREAM_BUFFER_INTERVAL")? {
            config.buffer_interval = interval;
        }
        if let Some(steps) = get_env_u32("STEPLINE_MAX_SYNC_STEPS")? {
            config.max_sync_steps = steps;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "buffer_interval must be greater than 0".to_string(),
            ));
        }
        if self.buffer_interval > Duration::from_secs(5) {
            return Err(ConfigError::ValidationError(
                "buffer_interval must not exceed 5s".to_string(),
            ));
        }
        if self.max_sync_steps == 0 {
            return Err(ConfigError::ValidationError(
                "max_sync_steps must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
