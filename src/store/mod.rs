//! Session backing store
//!
//! This module provides the storage abstraction behind the session store.
//! It supports:
//! - In-memory store (moka) - default, for single-instance deployment
//! - Redis store - optional, for deployments with several instances
//!
//! Backends only ever see opaque strings: the session store hands them
//! records whose payload is already encrypted. Every value carries its own
//! time-to-live.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SessionConfig, StoreDriver};

pub use memory::MemoryBackend;
#[cfg(feature = "redis-store")]
pub use redis::RedisBackend;

/// Key/value storage with per-entry expiry
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Get a live value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one, expiring after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Overwrite a value only if the key is still present.
    ///
    /// Returns `false` when the key was absent, in which case nothing is
    /// written. The session store relies on this so that a read racing with
    /// a logout cannot bring the session back.
    async fn replace(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    /// Overwrite a value only if it still equals `expected`.
    ///
    /// Returns `false` when the key is absent or holds something else.
    async fn replace_if(&self, key: &str, expected: &str, value: String, ttl: Duration)
        -> Result<bool>;

    /// Remove a value, reporting whether something was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check that the backend answers
    async fn ping(&self) -> Result<()>;
}

/// Create a backend instance based on configuration
///
/// - `StoreDriver::Memory` - Creates an in-memory store using moka
/// - `StoreDriver::Redis` - Creates a Redis store (requires `redis-store` feature)
///
/// # Errors
/// - Returns an error if Redis is configured but the `redis-store` feature is not enabled
/// - Returns an error if the Redis connection fails
pub async fn create_backend(config: &SessionConfig) -> Result<Arc<dyn SessionBackend>> {
    match config.driver {
        StoreDriver::Memory => Ok(Arc::new(MemoryBackend::with_capacity(config.max_capacity))),
        StoreDriver::Redis => {
            #[cfg(feature = "redis-store")]
            {
                let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Redis URL is required when using the Redis session driver. \
                         Set 'session.redis_url' or the SATCHEL_SESSION_REDIS_URL environment variable."
                    )
                })?;

                let backend = RedisBackend::connect(redis_url).await?;
                Ok(Arc::new(backend))
            }

            #[cfg(not(feature = "redis-store"))]
            {
                anyhow::bail!(
                    "Redis session driver is configured but the 'redis-store' feature is not enabled. \
                     Either enable the feature with `--features redis-store` or use the 'memory' driver."
                )
            }
        }
    }
}
