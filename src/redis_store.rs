//! Redis backing store

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, RedisError, aio::ConnectionManager};
use tracing::debug;

use crate::{BackingStore, StoreConfig, StoreError};

/// Backing store over a Redis connection manager.
///
/// Every command runs under the configured timeout; a timeout or a connection
/// level failure is reported as [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    command_timeout: Duration,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager, command_timeout: Duration) -> Self {
        Self {
            redis,
            command_timeout,
        }
    }

    /// Connect using the `store` configuration
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str()).map_err(classify)?;
        let timeout = config.command_timeout();
        let redis = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(manager) => manager.map_err(classify)?,
            Err(_) => {
                return Err(StoreError::Unavailable(format!(
                    "connecting to {} timed out after {:?}",
                    config.redis_url, timeout
                )));
            }
        };
        debug!("Connected to Redis at {}", config.redis_url);
        Ok(Self::new(redis, timeout))
    }

    async fn run<T, F>(&self, op: &str, key: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{} {} timed out after {:?}",
                op, key, self.command_timeout
            ))),
        }
    }
}

fn classify(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::OperationFailed(err)
    }
}

/// Whole seconds for `SETEX`, never below one
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        self.run("GET", key, conn.get::<_, Option<String>>(key)).await
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        self.run(
            "SETEX",
            key,
            conn.set_ex::<_, _, ()>(key, payload, ttl_seconds(ttl)),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        self.run("DEL", key, conn.del::<_, ()>(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_seconds() {
        assert_eq!(ttl_seconds(Duration::from_secs(300)), 300);
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
    }

    #[test]
    fn test_classify_command_errors() {
        let err = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(classify(err), StoreError::OperationFailed(_)));

        let err = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(classify(err), StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let config = StoreConfig {
            redis_url: "not-a-url".to_owned(),
            ..StoreConfig::default()
        };
        assert!(RedisStore::connect(&config).await.is_err());
    }
}
