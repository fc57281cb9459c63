//! Cache error types

use redis::RedisError;

/// Errors raised while turning a directive or a configuration entry into a TTL policy.
///
/// These happen at declaration or refresh time and are fatal for the one cache
/// name being resolved only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("directive declares no cache name")]
    MissingCacheName,

    #[error("invalid format for ttl expression {0:?}, expected digits or ${{cache.<name>}}")]
    MalformedExpression(String),

    #[error("invalid ttl value {value:?} for {key}")]
    InvalidTtlValue { key: String, value: String },

    #[error("invalid timeUnit {0:?}, expected one of s, m, h")]
    InvalidTimeUnit(String),

    #[error("there is no {base}.ttl property and no cache.default.ttl property")]
    MissingTtlConfiguration { base: String },

    #[error("there is no {base}.timeUnit property and no cache.default.timeUnit property")]
    MissingTimeUnitConfiguration { base: String },

    #[error("unknown cache type {0:?}")]
    UnknownBackingStoreKind(String),
}

/// Policy validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid policy: {0}")]
    InvalidPolicy(&'static str),
}

/// Backing store errors.
///
/// The interceptor absorbs every one of these; they only surface to callers
/// that talk to a [`BackingStore`](crate::BackingStore) directly.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    OperationFailed(#[from] RedisError),

    #[error("no store configured for cache type {0}")]
    UnsupportedBackingStoreKind(crate::BackingStoreKind),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading and watching errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("configuration watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("configuration source has no backing file to watch")]
    NotFileBacked,
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}
