//! Caching directives and their declaration table

use std::collections::HashMap;

use crate::{BackingStoreKind, TimeUnit};

/// Caching configuration declared once per call site.
///
/// Only the first cache name, the TTL expression, the explicit time unit and
/// the backing store kind drive TTL resolution. The key expression, `sync`,
/// `condition` and `unless` are carried for the caller's dispatch machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub cache_names: Vec<String>,
    pub key: String,
    /// Literal amount (`"90"`) or indirection (`"${cache.users}"`)
    pub ttl: String,
    pub time_unit: Option<TimeUnit>,
    pub backing_store: BackingStoreKind,
    pub sync: bool,
    pub condition: Option<String>,
    pub unless: Option<String>,
}

impl Directive {
    pub fn new(cache_name: impl Into<String>, ttl: impl Into<String>) -> Self {
        Self {
            cache_names: vec![cache_name.into()],
            key: String::new(),
            ttl: ttl.into(),
            time_unit: None,
            backing_store: BackingStoreKind::default(),
            sync: false,
            condition: None,
            unless: None,
        }
    }

    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_names.push(name.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = Some(unit);
        self
    }

    /// Set the time unit from a token such as `"s"`; unknown tokens mean minutes
    pub fn with_time_unit_token(mut self, token: &str) -> Self {
        self.time_unit = Some(TimeUnit::from_token_or_minutes(Some(token)));
        self
    }

    pub fn with_backing_store(mut self, kind: BackingStoreKind) -> Self {
        self.backing_store = kind;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_unless(mut self, unless: impl Into<String>) -> Self {
        self.unless = Some(unless.into());
        self
    }

    /// The cache name the resolved policy is registered under
    pub fn primary_name(&self) -> Option<&str> {
        self.cache_names.first().map(String::as_str)
    }
}

/// Directives keyed by call-site identifier, e.g. `"UserService::find_user"`
#[derive(Debug, Clone, Default)]
pub struct DirectiveTable {
    directives: HashMap<String, Directive>,
}

impl DirectiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the directive for a call site, returning any previous declaration
    pub fn declare(&mut self, call_site: impl Into<String>, directive: Directive) -> Option<Directive> {
        self.directives.insert(call_site.into(), directive)
    }

    pub fn get(&self, call_site: &str) -> Option<&Directive> {
        self.directives.get(call_site)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Directive)> {
        self.directives.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Directive)> for DirectiveTable {
    fn from_iter<I: IntoIterator<Item = (S, Directive)>>(iter: I) -> Self {
        Self {
            directives: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
