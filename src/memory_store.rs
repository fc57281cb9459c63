//! In-process backing store on Moka with per-entry TTL

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{Expiry, future::Cache};

use crate::{BackingStore, StoreConfig, StoreError};

#[derive(Clone)]
struct Entry {
    payload: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-memory store, useful for local runs and tests
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.memory_max_capacity)
    }

    /// Number of live entries, approximate until pending maintenance runs
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.cache.get(key).await.map(|entry| entry.payload))
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), StoreError> {
        self.cache.insert(key.to_owned(), Entry { payload, ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new(100);
        assert_eq!(store.get("users::1").await.unwrap(), None);

        store
            .set("users::1", "\"alice\"".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("users::1").await.unwrap().as_deref(), Some("\"alice\""));

        store.delete("users::1").await.unwrap();
        assert_eq!(store.get("users::1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire_with_their_own_ttl() {
        let store = MemoryStore::new(100);
        store
            .set("short", "1".to_owned(), Duration::from_millis(100))
            .await
            .unwrap();
        store
            .set("long", "2".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("2"));
    }
}
