//! # Stepline Store
//!
//! Interchangeable backends for the [`StateStore`](stepline_core::StateStore)
//! and [`EventPublisher`](stepline_core::EventPublisher) capabilities.
//!
//! - **Redis** (feature `redis`, default): snapshots, bounded history lists and
//!   metadata hashes written transactionally; events on Redis Streams with
//!   blocking `XREAD` tails.
//! - **In-memory**: a first-class local mode with identical semantics.
//!
//! ```rust,no_run
//! # #[cfg(feature = "redis")]
//! # async fn example() {
//! use stepline_store::{BackendConfig, RedisClientProvider, create_backends};
//!
//! let backends = create_backends(RedisClientProvider::global(), &BackendConfig::default()).await;
//! println!("using {}", backends.state_store.backend());
//! # }
//! ```

pub mod config;
pub mod factory;
pub mod memory_publisher;
pub mod memory_state;

#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "redis")]
pub mod redis_publisher;
#[cfg(feature = "redis")]
pub mod redis_state;

pub use config::{
    ConfigError, MEMORY_OPERATION_TTL, REDIS_OPERATION_TTL, StoreConfig, StreamConfig,
};
pub use factory::{BackendConfig, BackendKind, Backends, create_backends, memory_backends};
pub use memory_publisher::InMemoryEventPublisher;
pub use memory_state::InMemoryStateStore;

#[cfg(feature = "redis")]
pub use factory::{create_event_publisher, create_state_store};
#[cfg(feature = "redis")]
pub use crate::redis::{RedisClientProvider, RedisConfig, RedisHealth};
#[cfg(feature = "redis")]
pub use redis_publisher::RedisEventPublisher;
#[cfg(feature = "redis")]
pub use redis_state::RedisStateStore;
