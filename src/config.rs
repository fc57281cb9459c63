//! Store configuration

use std::time::Duration;

use figment::{Figment, providers::Serialized};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Configuration for the backing stores, read from the `store` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Timeout applied to every store command, in milliseconds
    pub command_timeout_ms: u64,
    /// Separator between cache name and key in store keys
    pub key_separator: String,
    /// Maximum number of entries held by the in-memory store
    pub memory_max_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            command_timeout_ms: 500,
            key_separator: "::".to_owned(),
            memory_max_capacity: 10_000,
        }
    }
}

impl StoreConfig {
    /// Extract the `store` section, filling missing fields with defaults
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(figment.focus("store"))
            .extract()?;
        Ok(config)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};

    #[test]
    fn test_defaults_when_section_missing() {
        let figment = Figment::from(Toml::string("[cache.users]\nttl = \"30\"\n"));
        let config = StoreConfig::from_figment(&figment).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.command_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_section_overrides() {
        let figment = Figment::from(Toml::string(
            "[store]\nredis_url = \"redis://cache:6380\"\ncommand_timeout_ms = 50\n",
        ));
        let config = StoreConfig::from_figment(&figment).unwrap();
        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.command_timeout(), Duration::from_millis(50));
        assert_eq!(config.key_separator, "::");
    }
}
