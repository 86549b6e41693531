//! Backend selection by reachability
//!
//! Redis is used when the provider yields a live pool; otherwise the in-memory
//! backends are returned. Configuration problems never surface to callers.

use std::sync::Arc;

use stepline_core::{EventPublisher, StateStore};
use tracing::info;

use crate::config::{StoreConfig, StreamConfig};
use crate::memory_publisher::InMemoryEventPublisher;
use crate::memory_state::InMemoryStateStore;

#[cfg(feature = "redis")]
use crate::redis::RedisClientProvider;
#[cfg(feature = "redis")]
use crate::redis_publisher::RedisEventPublisher;
#[cfg(feature = "redis")]
use crate::redis_state::RedisStateStore;

/// Which backend the factory picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Redis,
    Memory,
}

/// Settings for both capabilities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendConfig {
    pub store: StoreConfig,
    pub stream: StreamConfig,
}

impl BackendConfig {
    /// Read `STEPLINE_*` store and stream settings, keeping defaults for invalid ones
    pub fn from_env_or_default() -> Self {
        let store = StoreConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid store configuration, using defaults");
            StoreConfig::default()
        });
        let stream = StreamConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid stream configuration, using defaults");
            StreamConfig::default()
        });
        Self { store, stream }
    }
}

/// A state store and event publisher that belong together
pub struct Backends {
    pub kind: BackendKind,
    pub state_store: Arc<dyn StateStore>,
    pub event_publisher: Arc<dyn EventPublisher>,
}

pub fn memory_backends(config: &BackendConfig) -> Backends {
    Backends {
        kind: BackendKind::Memory,
        state_store: Arc::new(InMemoryStateStore::new(&config.store)),
        event_publisher: Arc::new(InMemoryEventPublisher::new(config.stream.clone())),
    }
}

/// Pick Redis if `provider` can reach it, otherwise memory
#[cfg(feature = "redis")]
pub async fn create_backends(provider: &RedisClientProvider, config: &BackendConfig) -> Backends {
    let store = RedisStateStore::from_provider(provider, &config.store).await;
    let publisher = RedisEventPublisher::from_provider(provider, config.stream.clone()).await;
    match (store, publisher) {
        (Some(store), Some(publisher)) => {
            info!("Using Redis state store and event publisher");
            Backends {
                kind: BackendKind::Redis,
                state_store: Arc::new(store),
                event_publisher: Arc::new(publisher),
            }
        }
        _ => {
            info!("Using in-memory state store and event publisher");
            memory_backends(config)
        }
    }
}

#[cfg(not(feature = "redis"))]
pub async fn create_backends(config: &BackendConfig) -> Backends {
    info!("Using in-memory state store and event publisher");
    memory_backends(config)
}

/// State store backed by Redis when reachable
#[cfg(feature = "redis")]
pub async fn create_state_store(
    provider: &RedisClientProvider,
    config: &StoreConfig,
) -> Arc<dyn StateStore> {
    match RedisStateStore::from_provider(provider, config).await {
        Some(store) => Arc::new(store),
        None => Arc::new(InMemoryStateStore::new(config)),
    }
}

/// Event publisher backed by Redis when reachable
#[cfg(feature = "redis")]
pub async fn create_event_publisher(
    provider: &RedisClientProvider,
    config: &StreamConfig,
) -> Arc<dyn EventPublisher> {
    match RedisEventPublisher::from_provider(provider, config.clone()).await {
        Some(publisher) => Arc::new(publisher),
        None => Arc::new(InMemoryEventPublisher::new(config.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn unconfigured_redis_falls_back_to_memory() {
        let provider = RedisClientProvider::new(None);
        let backends = create_backends(&provider, &BackendConfig::default()).await;
        assert_eq!(backends.kind, BackendKind::Memory);
        assert_eq!(backends.state_store.backend(), "memory");
        assert_eq!(backends.event_publisher.backend(), "memory");

        let store = create_state_store(&provider, &StoreConfig::default()).await;
        assert_eq!(store.backend(), "memory");
        let publisher = create_event_publisher(&provider, &StreamConfig::default()).await;
        assert_eq!(publisher.backend(), "memory");
    }

    #[test]
    fn memory_backends_are_memory() {
        let backends = memory_backends(&BackendConfig::default());
        assert_eq!(backends.kind, BackendKind::Memory);
    }
}
