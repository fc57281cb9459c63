//! Registry of TTL policies keyed by cache name
//!
//! Each name owns one [`PolicyHandle`], a shared cell whose whole policy is
//! swapped atomically. Writers never mutate the fields of a policy one by one,
//! so a reader sees either the previous policy or the next one. Updates to an
//! existing name go through the existing cell, which keeps handles held by
//! other components current.

use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::debug;

use crate::TtlPolicy;

/// Cache name reserved for fallback settings; never an active policy
pub const DEFAULT_CACHE_NAME: &str = "default";

/// Live reference to the policy of one cache name
#[derive(Clone)]
pub struct PolicyHandle {
    cell: Arc<ArcSwap<TtlPolicy>>,
}

impl PolicyHandle {
    fn new(policy: TtlPolicy) -> Self {
        Self {
            cell: Arc::new(ArcSwap::from_pointee(policy)),
        }
    }

    /// Current policy
    pub fn load(&self) -> TtlPolicy {
        **self.cell.load()
    }

    fn store(&self, policy: TtlPolicy) {
        self.cell.store(Arc::new(policy));
    }
}

impl fmt::Debug for PolicyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PolicyHandle").field(&self.load()).finish()
    }
}

/// Mapping from cache name to TTL policy.
///
/// Sharded by name, so updating one name never blocks readers of another.
#[derive(Debug, Default)]
pub struct TtlRegistry {
    policies: DashMap<String, PolicyHandle>,
}

impl TtlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<TtlPolicy> {
        self.policies.get(name).map(|handle| handle.load())
    }

    /// Handle that keeps observing updates made to `name`
    pub fn handle(&self, name: &str) -> Option<PolicyHandle> {
        self.policies.get(name).map(|handle| handle.clone())
    }

    /// Insert, or update the existing cell in place under the shard lock
    pub fn upsert(&self, name: &str, policy: TtlPolicy) {
        self.policies
            .entry(name.to_owned())
            .and_modify(|handle| handle.store(policy))
            .or_insert_with(|| PolicyHandle::new(policy));
    }

    /// Merge refreshed policies, updating existing names in place.
    ///
    /// The reserved [`DEFAULT_CACHE_NAME`] is skipped.
    pub fn bulk_merge<I, S>(&self, policies: I)
    where
        I: IntoIterator<Item = (S, TtlPolicy)>,
        S: AsRef<str>,
    {
        for (name, policy) in policies {
            let name = name.as_ref();
            if name.eq_ignore_ascii_case(DEFAULT_CACHE_NAME) {
                debug!("Skipping reserved cache name {} during merge", name);
                continue;
            }
            self.upsert(name, policy);
        }
    }

    pub fn remove(&self, name: &str) -> Option<TtlPolicy> {
        self.policies.remove(name).map(|(_, handle)| handle.load())
    }

    /// Registered cache names, in no particular order
    pub fn names(&self) -> Vec<String> {
        self.policies.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackingStoreKind, TimeUnit};
    use std::thread;

    fn policy(amount: i64, unit: TimeUnit) -> TtlPolicy {
        TtlPolicy::new(amount, unit, BackingStoreKind::Redis)
    }

    #[test]
    fn test_get_and_upsert() {
        let registry = TtlRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.get("users"), None);

        registry.upsert("users", policy(5, TimeUnit::Minutes));
        assert_eq!(registry.get("users"), Some(policy(5, TimeUnit::Minutes)));

        registry.upsert("users", policy(30, TimeUnit::Seconds));
        assert_eq!(registry.get("users"), Some(policy(30, TimeUnit::Seconds)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_handle_observes_updates() {
        let registry = TtlRegistry::new();
        registry.upsert("users", policy(5, TimeUnit::Minutes));
        let handle = registry.handle("users").unwrap();

        registry.upsert("users", policy(1, TimeUnit::Hours));
        assert_eq!(handle.load(), policy(1, TimeUnit::Hours));

        registry.bulk_merge([("users", policy(10, TimeUnit::Seconds))]);
        assert_eq!(handle.load(), policy(10, TimeUnit::Seconds));
    }

    #[test]
    fn test_bulk_merge_inserts_and_skips_default() {
        let registry = TtlRegistry::new();
        registry.upsert("users", policy(5, TimeUnit::Minutes));

        registry.bulk_merge([
            ("users".to_owned(), policy(6, TimeUnit::Minutes)),
            ("orders".to_owned(), policy(2, TimeUnit::Hours)),
            ("default".to_owned(), policy(60, TimeUnit::Minutes)),
            ("DEFAULT".to_owned(), policy(60, TimeUnit::Minutes)),
        ]);

        assert_eq!(registry.get("users"), Some(policy(6, TimeUnit::Minutes)));
        assert_eq!(registry.get("orders"), Some(policy(2, TimeUnit::Hours)));
        assert_eq!(registry.get("default"), None);
        assert_eq!(registry.len(), 2);

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["orders", "users"]);
    }

    #[test]
    fn test_remove() {
        let registry = TtlRegistry::new();
        registry.upsert("users", policy(5, TimeUnit::Minutes));
        assert_eq!(registry.remove("users"), Some(policy(5, TimeUnit::Minutes)));
        assert_eq!(registry.remove("users"), None);
    }

    #[test]
    fn test_upsert_after_remove_registers_a_new_cell() {
        let registry = TtlRegistry::new();
        registry.upsert("users", policy(5, TimeUnit::Minutes));
        let stale = registry.handle("users").unwrap();

        registry.remove("users");
        registry.upsert("users", policy(30, TimeUnit::Seconds));

        assert_eq!(registry.get("users"), Some(policy(30, TimeUnit::Seconds)));
        assert_eq!(stale.load(), policy(5, TimeUnit::Minutes));
    }

    #[test]
    fn test_concurrent_updates_are_never_torn() {
        let registry = Arc::new(TtlRegistry::new());
        let before = TtlPolicy::new(5, TimeUnit::Minutes, BackingStoreKind::Redis);
        let after = TtlPolicy::new(300, TimeUnit::Seconds, BackingStoreKind::Hazelcast);
        registry.upsert("x", before);

        let writers: Vec<_> = (0..2)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for n in 0..5_000 {
                        let next = if (n + i) % 2 == 0 { after } else { before };
                        if n % 3 == 0 {
                            registry.bulk_merge([("x", next)]);
                        } else {
                            registry.upsert("x", next);
                        }
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        let seen = registry.get("x").unwrap();
                        assert!(seen == before || seen == after, "torn policy: {seen:?}");
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }
}
