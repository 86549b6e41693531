//! Redis support shared by the Redis state store and event publisher
//!
//! - Lazily created, probed connection pool ([`RedisClientProvider`])
//! - Environment-driven configuration
//! - Key naming, error sanitising and health reporting

pub mod config;
pub mod error;
pub mod health;
pub mod keys;
pub mod provider;

pub use config::{DEFAULT_KEY_PREFIX, RedisConfig};
pub use error::sanitize_error;
pub use health::{PoolStats, RedisHealth};
pub use keys::OperationKeys;
pub use provider::RedisClientProvider;

use deadpool_redis::Connection;
use stepline_core::StoreResult;

use error::redis_error;

const SCAN_BATCH: usize = 200;

/// Collect every key matching `pattern` with cursor-based SCAN
pub(crate) async fn scan_keys(conn: &mut Connection, pattern: &str) -> StoreResult<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(&mut **conn)
            .await
            .map_err(|e| redis_error("SCAN", e))?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    // SCAN may return a key more than once
    keys.sort_unstable();
    keys.dedup();
    Ok(keys)
}

/// Expiry in whole seconds, never zero
pub(crate) fn ttl_secs(ttl: std::time::Duration) -> u64 {
    ttl.as_secs().max(1)
}
