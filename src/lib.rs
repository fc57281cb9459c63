//! timed-cache - Declarative TTL-aware caching layer
//!
//! Call sites declare a directive naming a cache and a TTL expression. The
//! expression is either a literal amount or a `${cache.<name>}` reference into
//! external configuration. Resolved policies live in a shared registry that
//! the interceptor consults on every call.
//!
//! The layer supports:
//! - Literal and configuration-driven TTLs with `cache.default.*` fallback
//! - Disabling caching per name with a negative TTL
//! - Redis and in-memory backing stores, degrading to a miss when unavailable
//! - Runtime refresh of policies when configuration changes

mod config;
mod directive;
mod error;
mod interceptor;
mod layer;
mod memory_store;
mod policy;
mod redis_store;
mod refresh;
mod registry;
mod resolver;
mod source;
mod store;
mod watcher;

pub use config::StoreConfig;
pub use directive::{Directive, DirectiveTable};
pub use error::{ConfigError, PolicyError, ResolveError, StoreError};
pub use interceptor::{
    CacheInterceptor, CacheOperations, Cacheable, InvocationContext, InvocationScope,
};
pub use layer::{CacheLayer, CacheLayerBuilder};
pub use memory_store::MemoryStore;
pub use policy::{BackingStoreKind, TimeUnit, TtlPolicy};
pub use redis_store::RedisStore;
pub use refresh::{RefreshCoordinator, RefreshReport, RefreshTrigger};
pub use registry::{DEFAULT_CACHE_NAME, PolicyHandle, TtlRegistry};
pub use resolver::{DirectiveResolver, ResolutionReport};
pub use source::{CACHE_SECTION, CacheEntry, ConfigSource, FigmentSource, Properties};
pub use store::{BackingStore, KeyFormatter, PrefixedKeyFormatter, RawKeyFormatter, StoreSet};
pub use watcher::ConfigWatcher;

// Re-export async_trait for custom backing stores
pub use async_trait::async_trait;
