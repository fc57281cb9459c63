//! Cache interception
//!
//! Every cached call goes through the same steps: look up the policy for the
//! cache name, bypass when there is none or it disables caching, otherwise
//! read the backing store and, on a miss, run the call and write its result
//! with the policy's TTL.
//!
//! Nothing that goes wrong in here reaches the caller. A failed read is a
//! miss and a failed write is dropped, so an unavailable store only costs hit
//! rate.

use std::{
    future::Future,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{BackingStore, KeyFormatter, PrefixedKeyFormatter, StoreSet, TtlRegistry};

/// Trait for types that can be cached
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Diagnostic state for one invocation, used to correlate cache hits in logs
#[derive(Debug, Default)]
pub struct InvocationContext {
    method: Option<String>,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the invoked method until the returned scope is dropped
    pub fn enter(&mut self, method: impl Into<String>) -> InvocationScope<'_> {
        self.method = Some(method.into());
        InvocationScope { ctx: self }
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn clear(&mut self) {
        self.method = None;
    }
}

/// Clears its [`InvocationContext`] when dropped
#[derive(Debug)]
pub struct InvocationScope<'a> {
    ctx: &'a mut InvocationContext,
}

impl Deref for InvocationScope<'_> {
    type Target = InvocationContext;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for InvocationScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for InvocationScope<'_> {
    fn drop(&mut self) {
        self.ctx.clear();
    }
}

/// Operations a call-dispatch layer needs from a cache
#[async_trait]
pub trait CacheOperations: Send + Sync {
    /// Cached value for `key`, or `None` on bypass, miss or any failure
    async fn get<V: Cacheable>(
        &self,
        ctx: &mut InvocationContext,
        cache_name: &str,
        key: &str,
    ) -> Option<V>;

    /// Best-effort write of `value` under the cache's TTL
    async fn put<V: Cacheable>(&self, cache_name: &str, key: &str, value: &V);

    /// Return the cached value for `key`, or run `call` and cache its result.
    ///
    /// Errors from `call` are returned unchanged and nothing is cached.
    async fn invoke<V, E, F, Fut>(
        &self,
        method: &str,
        cache_name: &str,
        key: &str,
        call: F,
    ) -> Result<V, E>
    where
        V: Cacheable,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        let mut ctx = InvocationContext::new();
        let mut scope = ctx.enter(method);

        if let Some(value) = self.get::<V>(&mut scope, cache_name, key).await {
            return Ok(value);
        }

        debug!("Invoking {} after cache miss in {}", method, cache_name);
        let value = call().await?;
        self.put(cache_name, key, &value).await;
        Ok(value)
    }
}

/// Interceptor that applies registry policies to backing store reads and writes
#[derive(Clone)]
pub struct CacheInterceptor {
    registry: Arc<TtlRegistry>,
    stores: StoreSet,
    key_formatter: Arc<dyn KeyFormatter>,
}

impl CacheInterceptor {
    pub fn new(registry: Arc<TtlRegistry>, stores: StoreSet) -> Self {
        Self {
            registry,
            stores,
            key_formatter: Arc::new(PrefixedKeyFormatter::default()),
        }
    }

    pub fn with_key_formatter(self, key_formatter: impl KeyFormatter) -> Self {
        self.with_shared_key_formatter(Arc::new(key_formatter))
    }

    pub fn with_shared_key_formatter(mut self, key_formatter: Arc<dyn KeyFormatter>) -> Self {
        self.key_formatter = key_formatter;
        self
    }

    pub fn registry(&self) -> &Arc<TtlRegistry> {
        &self.registry
    }

    /// TTL and store for `cache_name`, or `None` when the call must bypass the cache
    fn usable(&self, cache_name: &str, op: &str) -> Option<(Duration, &Arc<dyn BackingStore>)> {
        let policy = self.registry.get(cache_name)?;
        if policy.is_disabled() {
            debug!("Caching disabled for {}, skipping {}", cache_name, op);
            return None;
        }
        if let Err(e) = policy.validate() {
            warn!("Skipping {} for cache {}: {}", op, cache_name, e);
            return None;
        }
        match self.stores.get(policy.kind) {
            Ok(store) => Some((policy.ttl()?, store)),
            Err(e) => {
                warn!("Skipping {} for cache {}: {}", op, cache_name, e);
                None
            }
        }
    }
}

#[async_trait]
impl CacheOperations for CacheInterceptor {
    async fn get<V: Cacheable>(
        &self,
        ctx: &mut InvocationContext,
        cache_name: &str,
        key: &str,
    ) -> Option<V> {
        let (_, store) = self.usable(cache_name, "get")?;
        let store_key = self.key_formatter.format_key(cache_name, key);

        let payload = match store.get(&store_key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("Cache miss in {} for key: {}", cache_name, key);
                return None;
            }
            Err(e) => {
                warn!(
                    "Cache get error in {} for key {} ({}). Falling back to the call.",
                    cache_name, key, e
                );
                return None;
            }
        };

        match serde_json::from_str::<V>(&payload) {
            Ok(value) => {
                debug!(
                    "Method {} returned from cache {}",
                    ctx.method().unwrap_or("<unknown>"),
                    cache_name
                );
                ctx.clear();
                Some(value)
            }
            Err(e) => {
                warn!(
                    "Failed to deserialize cached value in {} for key {}: {}. Deleting corrupt entry.",
                    cache_name, key, e
                );
                if let Err(del_err) = store.delete(&store_key).await {
                    warn!(
                        "Failed to delete corrupt entry {} (store key: {}): {}",
                        key, store_key, del_err
                    );
                }
                None
            }
        }
    }

    async fn put<V: Cacheable>(&self, cache_name: &str, key: &str, value: &V) {
        let Some((ttl, store)) = self.usable(cache_name, "put") else {
            return;
        };
        let store_key = self.key_formatter.format_key(cache_name, key);

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize value for {} in {}: {}", key, cache_name, e);
                return;
            }
        };

        match store.set(&store_key, payload, ttl).await {
            Ok(()) => debug!("Cached {} in {} for {:?}", key, cache_name, ttl),
            Err(e) => warn!(
                "Cache put error in {} for key {} (store key: {}): {}. Continuing.",
                cache_name, key, store_key, e
            ),
        }
    }
}
