//! External configuration sources
//!
//! The resolver and the refresh coordinator only ever read configuration.
//! Two sources are provided:
//! - [`Properties`]: flat `key = value` pairs held in memory
//! - [`FigmentSource`]: a TOML file layered with prefixed environment
//!   variables, reloadable at runtime

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
    value::{Dict, Value},
};
use serde::Deserialize;
use tracing::debug;

use crate::ConfigError;

/// Prefix under which cache settings live
pub const CACHE_SECTION: &str = "cache";

/// One entry of the `cache` configuration section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Map-shaped entry, e.g. `{ ttl = "30", timeUnit = "s", cacheType = "REDIS" }`
    Table(BTreeMap<String, String>),
    /// Anything else (a bare scalar, a list, ...)
    Malformed,
}

impl CacheEntry {
    /// Look up a field, ignoring ASCII case
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Table(fields) => fields
                .get(name)
                .or_else(|| {
                    fields
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v)
                })
                .map(String::as_str),
            Self::Malformed => None,
        }
    }
}

/// Read-only view of externally supplied configuration
pub trait ConfigSource: Send + Sync + 'static {
    /// Look up a dotted property such as `cache.users.ttl`
    fn get_property(&self, key: &str) -> Option<String>;

    /// Every entry of the `cache` section, keyed by cache name
    fn cache_entries(&self) -> Vec<(String, CacheEntry)>;
}

/// In-memory flat properties.
///
/// Updates swap the whole map, so readers never see a partially applied
/// batch from [`Properties::replace_all`].
#[derive(Default)]
pub struct Properties {
    values: ArcSwap<BTreeMap<String, String>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<BTreeMap<_, _>>();
        Self {
            values: ArcSwap::from_pointee(values),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.values.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(key.clone(), value.clone());
            next
        });
    }

    pub fn remove(&self, key: &str) {
        self.values.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.remove(key);
            next
        });
    }

    /// Replace every property at once
    pub fn replace_all(&self, values: BTreeMap<String, String>) {
        self.values.store(Arc::new(values));
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.load().iter()).finish()
    }
}

impl ConfigSource for Properties {
    fn get_property(&self, key: &str) -> Option<String> {
        self.values.load().get(key).cloned()
    }

    fn cache_entries(&self) -> Vec<(String, CacheEntry)> {
        let values = self.values.load();
        let prefix = format!("{CACHE_SECTION}.");
        let mut entries: BTreeMap<String, CacheEntry> = BTreeMap::new();

        for (key, value) in values.iter() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('.') {
                Some((name, field)) => {
                    let entry = entries
                        .entry(name.to_owned())
                        .or_insert_with(|| CacheEntry::Table(BTreeMap::new()));
                    if let CacheEntry::Table(fields) = entry {
                        fields.insert(field.to_owned(), value.clone());
                    }
                }
                // `cache.<name> = value` is not map-shaped
                None => {
                    entries.insert(rest.to_owned(), CacheEntry::Malformed);
                }
            }
        }

        entries.into_iter().collect()
    }
}

/// Scalar configuration value, rendered back to the string the resolver parses
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Flag(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Render a configuration value as the string the resolver parses.
///
/// Tables and lists render as JSON so a present but unusable value still
/// reaches the parser and fails there instead of looking absent.
fn render_value(value: &Value) -> String {
    let scalar = match value {
        Value::Dict(..) | Value::Array(..) => None,
        other => other.deserialize::<Scalar>().ok(),
    };
    match scalar {
        Some(scalar) => scalar.to_string(),
        None => serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}")),
    }
}

#[derive(Debug, Clone)]
struct FileOrigin {
    path: PathBuf,
    env_prefix: Option<String>,
}

impl FileOrigin {
    fn build(&self) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Toml::file(&self.path));
        if let Some(prefix) = &self.env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }
        // Surface syntax errors now rather than on the first lookup
        figment.extract::<Dict>()?;
        Ok(figment)
    }
}

/// Figment-backed configuration source.
///
/// Environment variables override the file: with prefix `APP_`,
/// `APP_CACHE__USERS__TTL=30` sets `cache.users.ttl`. Figment lowercases
/// environment keys, so lookups retry with a lowercased key.
pub struct FigmentSource {
    figment: ArcSwap<Figment>,
    origin: Option<FileOrigin>,
}

impl FigmentSource {
    /// Wrap an already assembled figment; [`FigmentSource::reload`] is a no-op
    pub fn new(figment: Figment) -> Self {
        Self {
            figment: ArcSwap::from_pointee(figment),
            origin: None,
        }
    }

    /// Load from a TOML file, optionally layered with prefixed environment variables
    pub fn from_file(
        path: impl AsRef<Path>,
        env_prefix: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let origin = FileOrigin {
            path: path.as_ref().to_path_buf(),
            env_prefix: env_prefix.map(str::to_owned),
        };
        let figment = origin.build()?;
        Ok(Self {
            figment: ArcSwap::from_pointee(figment),
            origin: Some(origin),
        })
    }

    /// File this source was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.origin.as_ref().map(|o| o.path.as_path())
    }

    /// Current configuration snapshot
    pub fn figment(&self) -> Arc<Figment> {
        self.figment.load_full()
    }

    /// Re-read the backing file.
    ///
    /// On failure the previous configuration stays in effect.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(origin) = &self.origin {
            let figment = origin.build()?;
            self.figment.store(Arc::new(figment));
            debug!("Configuration reloaded from {}", origin.path.display());
        }
        Ok(())
    }
}

impl fmt::Debug for FigmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FigmentSource")
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

impl ConfigSource for FigmentSource {
    fn get_property(&self, key: &str) -> Option<String> {
        let figment = self.figment.load();
        let value = figment
            .find_value(key)
            .or_else(|_| figment.find_value(&key.to_ascii_lowercase()))
            .ok()?;
        Some(render_value(&value))
    }

    fn cache_entries(&self) -> Vec<(String, CacheEntry)> {
        let figment = self.figment.load();
        let Some(section) = figment
            .find_value(CACHE_SECTION)
            .ok()
            .and_then(Value::into_dict)
        else {
            return Vec::new();
        };

        section
            .into_iter()
            .map(|(name, value)| {
                let entry = match value.into_dict() {
                    Some(fields) => CacheEntry::Table(
                        fields
                            .iter()
                            .map(|(k, v)| (k.clone(), render_value(v)))
                            .collect(),
                    ),
                    None => CacheEntry::Malformed,
                };
                (name, entry)
            })
            .collect()
    }
}
