//! Integration tests for environment-based configuration

use serial_test::serial;
use std::env;
use std::time::Duration;
use stepline_store::{ConfigError, StoreConfig, StreamConfig};

fn set_env(key: &str, value: &str) {
    unsafe {
        env::set_var(key, value);
    }
}

fn clear_env(key: &str) {
    unsafe {
        env::remove_var(key);
    }
}

const VARS: &[&str] = &[
    "STEPLINE_OPERATION_TTL",
    "STEPLINE_HISTORY_LIMIT",
    "STEPLINE_STREAM_MAX_LEN",
    "STEPLINE_STREAM_TTL",
    "STEPLINE_STREAM_BLOCK",
    "STEPLINE_STREAM_MAX_RETRIES",
    "STEPLINE_REDIS_URL",
    "REDIS_URL",
    "STEPLINE_REDIS_POOL_SIZE",
    "STEPLINE_REDIS_CONNECT_TIMEOUT",
    "STEPLINE_REDIS_KEY_PREFIX",
];

fn clear_all() {
    for var in VARS {
        clear_env(var);
    }
}

#[test]
#[serial]
fn test_defaults_when_no_vars_set() {
    clear_all();
    let store = StoreConfig::from_env().expect("defaults should load");
    assert_eq!(store.operation_ttl, None);
    assert_eq!(store.history_limit, 200);

    let stream = StreamConfig::from_env().expect("defaults should load");
    assert_eq!(stream.max_len, 1000);
    assert_eq!(stream.ttl, Duration::from_secs(3600));
    assert_eq!(stream.block, Duration::from_secs(1));
    assert_eq!(stream.max_retries, 5);
}

#[test]
#[serial]
fn test_humantime_durations() {
    clear_all();
    set_env("STEPLINE_OPERATION_TTL", "90m");
    set_env("STEPLINE_STREAM_BLOCK", "250ms");

    let store = StoreConfig::from_env().unwrap();
    assert_eq!(store.operation_ttl, Some(Duration::from_secs(90 * 60)));
    let stream = StreamConfig::from_env().unwrap();
    assert_eq!(stream.block, Duration::from_millis(250));

    clear_all();
}

#[test]
#[serial]
fn test_invalid_values_rejected() {
    clear_all();
    set_env("STEPLINE_HISTORY_LIMIT", "lots");
    assert!(matches!(
        StoreConfig::from_env(),
        Err(ConfigError::InvalidEnvVar { key, .. }) if key == "STEPLINE_HISTORY_LIMIT"
    ));

    set_env("STEPLINE_HISTORY_LIMIT", "0");
    assert!(matches!(
        StoreConfig::from_env(),
        Err(ConfigError::ValidationError(_))
    ));

    set_env("STEPLINE_STREAM_TTL", "soon");
    assert!(StreamConfig::from_env().is_err());

    clear_all();
}

#[cfg(feature = "redis")]
mod redis_env {
    use super::*;
    use stepline_store::RedisConfig;

    #[test]
    #[serial]
    fn test_redis_unconfigured_without_url() {
        clear_all();
        assert_eq!(RedisConfig::from_env().unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_redis_url_fallback_and_overrides() {
        clear_all();
        set_env("REDIS_URL", "redis://cache:6379");
        set_env("STEPLINE_REDIS_POOL_SIZE", "20");
        set_env("STEPLINE_REDIS_CONNECT_TIMEOUT", "2s");
        set_env("STEPLINE_REDIS_KEY_PREFIX", "runs");

        let config = RedisConfig::from_env().unwrap().unwrap();
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.key_prefix, "runs");

        set_env("STEPLINE_REDIS_URL", "redis://primary:6379");
        let config = RedisConfig::from_env().unwrap().unwrap();
        assert_eq!(config.url, "redis://primary:6379");

        clear_all();
    }

    #[test]
    #[serial]
    fn test_redis_pool_size_validated() {
        clear_all();
        set_env("STEPLINE_REDIS_URL", "redis://localhost:6379");
        set_env("STEPLINE_REDIS_POOL_SIZE", "500");
        assert!(matches!(
            RedisConfig::from_env(),
            Err(ConfigError::ValidationError(_))
        ));
        clear_all();
    }
}
