//! Backing store abstraction
//!
//! The interceptor talks to stores through [`BackingStore`] and picks one per
//! policy from a [`StoreSet`]. A backing store kind with no store in the set
//! is the "declared but unsupported" case: reads miss and writes are dropped.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{BackingStoreKind, RedisStore, StoreConfig, StoreError};

/// Single-key operations against an external key/value store.
///
/// Payloads are JSON strings produced by the interceptor.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Builds the store key for a cache name and a call key
pub trait KeyFormatter: Send + Sync + 'static {
    fn format_key(&self, cache_name: &str, key: &str) -> String;
}

/// `<cache_name><separator><key>`, e.g. `users::42`
#[derive(Debug, Clone)]
pub struct PrefixedKeyFormatter {
    separator: String,
}

impl PrefixedKeyFormatter {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.key_separator.as_str())
    }
}

impl Default for PrefixedKeyFormatter {
    fn default() -> Self {
        Self::new("::")
    }
}

impl KeyFormatter for PrefixedKeyFormatter {
    fn format_key(&self, cache_name: &str, key: &str) -> String {
        format!("{}{}{}", cache_name, self.separator, key)
    }
}

/// Uses the call key unchanged; every cache name shares one key space
#[derive(Debug, Clone, Copy, Default)]
pub struct RawKeyFormatter;

impl KeyFormatter for RawKeyFormatter {
    fn format_key(&self, _cache_name: &str, key: &str) -> String {
        key.to_owned()
    }
}

/// Stores available to the interceptor, by backing store kind
#[derive(Clone, Default)]
pub struct StoreSet {
    stores: HashMap<BackingStoreKind, Arc<dyn BackingStore>>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to Redis and serve `REDIS` policies from it
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let redis = RedisStore::connect(config).await?;
        Ok(Self::new().with_store(BackingStoreKind::Redis, Arc::new(redis)))
    }

    pub fn with_store(mut self, kind: BackingStoreKind, store: Arc<dyn BackingStore>) -> Self {
        self.insert(kind, store);
        self
    }

    pub fn insert(&mut self, kind: BackingStoreKind, store: Arc<dyn BackingStore>) {
        self.stores.insert(kind, store);
    }

    pub fn get(&self, kind: BackingStoreKind) -> Result<&Arc<dyn BackingStore>, StoreError> {
        self.stores
            .get(&kind)
            .ok_or(StoreError::UnsupportedBackingStoreKind(kind))
    }

    pub fn supports(&self, kind: BackingStoreKind) -> bool {
        self.stores.contains_key(&kind)
    }
}

impl fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.stores.keys()).finish()
    }
}
