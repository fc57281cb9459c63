//! Runtime policy refresh
//!
//! A refresh rescans the `cache` configuration section and merges the
//! resulting policies into the registry. Existing names are updated in place,
//! so interceptions already holding a handle see the new policy on their next
//! read, and in-flight operations finish under whichever whole policy they
//! loaded.

use std::sync::Arc;

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    BackingStoreKind, CacheEntry, ConfigSource, DEFAULT_CACHE_NAME, DirectiveResolver,
    ResolveError, TtlPolicy, TtlRegistry,
};

const DEFAULT_CACHE_TYPE_KEY: &str = "cache.default.cacheType";

/// Outcome of one refresh pass
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    /// The reserved default entry and entries that are not map-shaped
    pub skipped: Vec<String>,
    pub failed: Vec<(String, ResolveError)>,
}

/// Re-derives policies from configuration when told the configuration changed
pub struct RefreshCoordinator {
    resolver: DirectiveResolver,
    registry: Arc<TtlRegistry>,
}

impl RefreshCoordinator {
    pub fn new(config: Arc<dyn ConfigSource>, registry: Arc<TtlRegistry>) -> Self {
        Self {
            resolver: DirectiveResolver::new(config),
            registry,
        }
    }

    /// Rescan configuration and merge every resolvable entry
    pub fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut resolved = Vec::new();

        for (name, entry) in self.resolver.config().cache_entries() {
            if name.eq_ignore_ascii_case(DEFAULT_CACHE_NAME) {
                report.skipped.push(name);
                continue;
            }
            if entry == CacheEntry::Malformed {
                debug!("Skipping cache entry {} that is not a table", name);
                report.skipped.push(name);
                continue;
            }
            match self.policy_for(&name, &entry) {
                Ok(policy) => resolved.push((name, policy)),
                Err(e) => {
                    warn!("Failed to refresh cache {}: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }

        report.updated = resolved.iter().map(|(name, _)| name.clone()).collect();
        self.registry.bulk_merge(resolved);
        report
    }

    fn policy_for(&self, name: &str, entry: &CacheEntry) -> Result<TtlPolicy, ResolveError> {
        let base = format!("cache.{name}");
        let owned = |field: &str| entry.field(field).map(str::to_owned);

        let amount = self
            .resolver
            .ttl_or_default(&base, &format!("{base}.ttl"), owned("ttl"))?;
        let unit = self.resolver.time_unit_or_default(&base, owned("timeUnit"))?;
        // Without a configured kind the name keeps the kind it was declared with
        let kind = match owned("cacheType")
            .or_else(|| self.resolver.config().get_property(DEFAULT_CACHE_TYPE_KEY))
        {
            Some(kind) => kind.parse()?,
            None => self
                .registry
                .get(name)
                .map(|policy| policy.kind)
                .unwrap_or_default(),
        };

        Ok(TtlPolicy::new(amount, unit, kind))
    }

    /// Run refreshes on a background task, one per received signal.
    ///
    /// Signals sent while a refresh is pending collapse into that refresh.
    /// The task ends once every [`RefreshTrigger`] is dropped.
    pub fn spawn(self: Arc<Self>) -> (RefreshTrigger, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let report = self.refresh();
                debug!(
                    "Cache policies refreshed: {} updated, {} skipped, {} failed",
                    report.updated.len(),
                    report.skipped.len(),
                    report.failed.len()
                );
            }
            debug!("Refresh listener stopped");
        });
        (RefreshTrigger { tx }, handle)
    }
}

/// Payload-less "configuration changed" signal
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Request a refresh; `false` once the listener has stopped
    pub fn signal(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}
