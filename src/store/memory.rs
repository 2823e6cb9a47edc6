//! In-memory session backend using moka
//!
//! Provides a fast, thread-safe in-process store with a time-to-live per
//! entry.
//!
//! # Features
//! - Per-entry expiry through a moka `Expiry` policy
//! - Conditional overwrite through the entry compute API
//! - Bounded capacity

use super::SessionBackend;
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default maximum number of stored sessions
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Stored value with the lifetime it was written with
#[derive(Clone)]
struct StoredEntry {
    value: Arc<String>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was last written with.
///
/// Reads leave the deadline alone; sliding expiration is done by the session
/// store rewriting the entry.
struct WrittenTtl;

impl Expiry<String, StoredEntry> for WrittenTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory backend using moka
pub struct MemoryBackend {
    cache: Cache<String, StoredEntry>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MemoryBackend {
    /// Create a new memory backend with the default capacity (10,000 sessions)
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }

    /// Create a new memory backend holding at most `max_capacity` sessions
    pub fn with_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(WrittenTtl)
            .build();

        Self { cache }
    }

    /// Get the current number of entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Process pending evictions and expirations
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|entry| entry.value.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = StoredEntry {
            value: Arc::new(value),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn replace(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let entry = StoredEntry {
            value: Arc::new(value),
            ttl,
        };

        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(move |existing| {
                let op = match existing {
                    Some(_) => Op::Put(entry),
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool> {
        let entry = StoredEntry {
            value: Arc::new(value),
            ttl,
        };

        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(move |existing| {
                let unchanged = existing
                    .as_ref()
                    .is_some_and(|current| current.value().value.as_str() == expected);
                let op = if unchanged { Op::Put(entry) } else { Op::Nop };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = MemoryBackend::new();

        backend.set("key1", "value1".to_string(), MINUTE).await.unwrap();

        assert_eq!(backend.get("key1").await.unwrap(), Some("value1".to_string()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_existing_key() {
        let backend = MemoryBackend::new();

        backend.set("key1", "value1".to_string(), MINUTE).await.unwrap();
        backend.set("key1", "value2".to_string(), MINUTE).await.unwrap();

        assert_eq!(backend.get("key1").await.unwrap(), Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let backend = MemoryBackend::new();

        backend.set("key1", "value1".to_string(), MINUTE).await.unwrap();

        assert!(backend.delete("key1").await.unwrap());
        assert!(!backend.delete("key1").await.unwrap());
        assert_eq!(backend.get("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_only_when_present() {
        let backend = MemoryBackend::new();

        assert!(!backend.replace("key1", "ghost".to_string(), MINUTE).await.unwrap());
        assert_eq!(backend.get("key1").await.unwrap(), None);

        backend.set("key1", "value1".to_string(), MINUTE).await.unwrap();
        assert!(backend.replace("key1", "value2".to_string(), MINUTE).await.unwrap());
        assert_eq!(backend.get("key1").await.unwrap(), Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_replace_if_compares_current_value() {
        let backend = MemoryBackend::new();

        assert!(!backend
            .replace_if("key1", "value1", "value2".to_string(), MINUTE)
            .await
            .unwrap());

        backend.set("key1", "value1".to_string(), MINUTE).await.unwrap();
        assert!(!backend
            .replace_if("key1", "stale", "value2".to_string(), MINUTE)
            .await
            .unwrap());
        assert_eq!(backend.get("key1").await.unwrap(), Some("value1".to_string()));

        assert!(backend
            .replace_if("key1", "value1", "value2".to_string(), MINUTE)
            .await
            .unwrap());
        assert_eq!(backend.get("key1").await.unwrap(), Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_entries_expire_after_their_own_ttl() {
        let backend = MemoryBackend::new();

        backend
            .set("short", "a".to_string(), Duration::from_millis(50))
            .await
            .unwrap();
        backend.set("long", "b".to_string(), MINUTE).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        backend.run_pending_tasks().await;

        assert_eq!(backend.get("short").await.unwrap(), None);
        assert_eq!(backend.get("long").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_replace_resets_ttl() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_millis(200);

        backend.set("key", "v1".to_string(), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(backend.replace("key", "v2".to_string(), ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;

        // 240ms after creation, 120ms after the rewrite
        assert_eq!(backend.get("key").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_entry_count() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.entry_count(), 0);

        backend.set("key1", "value1".to_string(), MINUTE).await.unwrap();
        backend.set("key2", "value2".to_string(), MINUTE).await.unwrap();
        backend.run_pending_tasks().await;

        assert_eq!(backend.entry_count(), 2);
    }
}
