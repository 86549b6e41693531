//! Mapping of Redis and pool errors onto `StoreError`

use deadpool_redis::PoolError;
use redis::{ErrorKind as RedisErrorKind, RedisError};
use stepline_core::StoreError;
use tracing::debug;

/// Sanitize Redis errors before they leave the crate
pub fn sanitize_error(error: &RedisError) -> String {
    match error.kind() {
        RedisErrorKind::AuthenticationFailed => "Authentication failed".to_string(),
        RedisErrorKind::TypeError => "Data type error".to_string(),
        RedisErrorKind::ExecAbortError => "Transaction aborted".to_string(),
        RedisErrorKind::BusyLoadingError => "Redis is loading data".to_string(),
        RedisErrorKind::NoScriptError => "Script not found".to_string(),
        RedisErrorKind::ReadOnly => "Redis is read-only".to_string(),
        _ if error.is_timeout() => "Operation timeout".to_string(),
        _ if error.is_connection_refusal() || error.is_connection_dropped() => {
            "Connection error".to_string()
        }
        _ if error.to_string().contains("connection") => "Connection error".to_string(),
        _ => "Redis operation failed".to_string(),
    }
}

/// Convert a command failure, tagging it with what was being attempted
pub(crate) fn redis_error(context: &str, error: RedisError) -> StoreError {
    debug!(context, error = %error, "Redis command failed");
    let message = format!("{context}: {}", sanitize_error(&error));
    if error.is_io_error()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
        || error.is_timeout()
    {
        StoreError::ConnectionFailed(message)
    } else {
        StoreError::Backend(message)
    }
}

pub(crate) fn pool_error(error: PoolError) -> StoreError {
    match error {
        PoolError::Backend(e) => redis_error("pool checkout", e),
        PoolError::Timeout(_) => {
            StoreError::ConnectionFailed("Timed out waiting for a pooled connection".to_string())
        }
        other => StoreError::ConnectionFailed(format!("Failed to get connection from pool: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_errors_are_backend_errors() {
        let err = RedisError::from((RedisErrorKind::TypeError, "WRONGTYPE", "detail".to_string()));
        assert_eq!(sanitize_error(&err), "Data type error");
        assert!(matches!(redis_error("load state", err), StoreError::Backend(msg) if msg == "load state: Data type error"));
    }

    #[test]
    fn io_errors_are_connection_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = RedisError::from(io);
        assert!(matches!(
            redis_error("xadd", err),
            StoreError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn sanitized_messages_hide_detail() {
        let err = RedisError::from((
            RedisErrorKind::AuthenticationFailed,
            "auth",
            "password=hunter2".to_string(),
        ));
        assert!(!sanitize_error(&err).contains("hunter2"));
    }
}
