//! Wiring for the whole caching layer
//!
//! [`CacheLayer`] owns the registry and resolves every declared directive when
//! it is built. Calls are dispatched by call-site identifier to the directive
//! declared for them; call sites without a directive are never cached.

use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    CacheInterceptor, CacheOperations, Cacheable, ConfigSource, Directive, DirectiveResolver,
    DirectiveTable, KeyFormatter, RefreshCoordinator, RefreshReport, RefreshTrigger,
    ResolutionReport, ResolveError, StoreSet, TtlPolicy, TtlRegistry,
};

pub struct CacheLayerBuilder {
    config: Arc<dyn ConfigSource>,
    stores: StoreSet,
    directives: DirectiveTable,
    key_formatter: Option<Arc<dyn KeyFormatter>>,
}

impl CacheLayerBuilder {
    pub fn stores(mut self, stores: StoreSet) -> Self {
        self.stores = stores;
        self
    }

    pub fn directives(mut self, directives: DirectiveTable) -> Self {
        self.directives = directives;
        self
    }

    pub fn directive(mut self, call_site: impl Into<String>, directive: Directive) -> Self {
        self.directives.declare(call_site, directive);
        self
    }

    pub fn key_formatter(mut self, key_formatter: impl KeyFormatter) -> Self {
        self.key_formatter = Some(Arc::new(key_formatter));
        self
    }

    /// Resolve every directive and assemble the layer.
    ///
    /// A directive that fails to resolve leaves its call site uncached and is
    /// listed in the report; the other directives are unaffected.
    pub fn build(self) -> (CacheLayer, ResolutionReport) {
        let registry = Arc::new(TtlRegistry::new());
        let resolver = DirectiveResolver::new(Arc::clone(&self.config));
        let report = resolver.register_all(self.directives.iter(), &registry);

        let mut interceptor = CacheInterceptor::new(Arc::clone(&registry), self.stores);
        if let Some(key_formatter) = self.key_formatter {
            interceptor = interceptor.with_shared_key_formatter(key_formatter);
        }
        let refresh = Arc::new(RefreshCoordinator::new(self.config, Arc::clone(&registry)));

        let directives = self
            .directives
            .iter()
            .map(|(call_site, directive)| (call_site.to_owned(), directive.clone()))
            .collect();

        debug!(
            "Cache layer built with {} policies, {} directives failed",
            registry.len(),
            report.failed.len()
        );

        let layer = CacheLayer {
            resolver,
            registry,
            interceptor,
            refresh,
            directives,
        };
        (layer, report)
    }
}

/// Directive-driven caching over an interceptor
pub struct CacheLayer {
    resolver: DirectiveResolver,
    registry: Arc<TtlRegistry>,
    interceptor: CacheInterceptor,
    refresh: Arc<RefreshCoordinator>,
    directives: DashMap<String, Directive>,
}

impl CacheLayer {
    pub fn builder(config: Arc<dyn ConfigSource>) -> CacheLayerBuilder {
        CacheLayerBuilder {
            config,
            stores: StoreSet::new(),
            directives: DirectiveTable::new(),
            key_formatter: None,
        }
    }

    pub fn registry(&self) -> &Arc<TtlRegistry> {
        &self.registry
    }

    pub fn interceptor(&self) -> &CacheInterceptor {
        &self.interceptor
    }

    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    pub fn directive(&self, call_site: &str) -> Option<Directive> {
        self.directives.get(call_site).map(|d| d.clone())
    }

    /// Resolve and register a directive after the layer is built.
    ///
    /// On failure the call site keeps whatever directive it had before.
    pub fn declare(
        &self,
        call_site: impl Into<String>,
        directive: Directive,
    ) -> Result<TtlPolicy, ResolveError> {
        let call_site = call_site.into();
        let policy = self.resolver.register(&directive, &self.registry)?;
        self.directives.insert(call_site, directive);
        Ok(policy)
    }

    /// Rescan configuration now
    pub fn refresh(&self) -> RefreshReport {
        self.refresh.refresh()
    }

    /// Start the background refresh listener
    pub fn spawn_refresh(&self) -> (RefreshTrigger, JoinHandle<()>) {
        Arc::clone(&self.refresh).spawn()
    }

    /// Run `call` for `call_site` through the cache named by its directive
    pub async fn call<V, E, F, Fut>(&self, call_site: &str, key: &str, call: F) -> Result<V, E>
    where
        V: Cacheable,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
    {
        let cache_name = self
            .directives
            .get(call_site)
            .and_then(|d| d.primary_name().map(str::to_owned));

        match cache_name {
            Some(cache_name) => {
                self.interceptor
                    .invoke(call_site, &cache_name, key, call)
                    .await
            }
            None => {
                warn!("No cache directive declared for {}, calling through", call_site);
                call().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackingStoreKind, MemoryStore, Properties, TimeUnit};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(props: Properties, directives: DirectiveTable) -> (CacheLayer, ResolutionReport) {
        let stores = StoreSet::new().with_store(BackingStoreKind::Redis, Arc::new(MemoryStore::new(100)));
        CacheLayer::builder(Arc::new(props))
            .stores(stores)
            .directives(directives)
            .build()
    }

    #[test]
    fn test_build_reports_failures_per_directive() {
        let props = Properties::from_pairs([
            ("cache.users.ttl", "30"),
            ("cache.users.timeUnit", "s"),
        ]);
        let directives = DirectiveTable::from_iter([
            ("UserService::find", Directive::new("users", "${cache.users}")),
            ("OrderService::find", Directive::new("orders", "${cache.orders}")),
            ("ItemService::find", Directive::new("items", "10").with_time_unit(TimeUnit::Hours)),
        ]);

        let (layer, report) = build(props, directives);

        assert!(!report.is_clean());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "OrderService::find");
        assert!(matches!(
            report.failed[0].1,
            ResolveError::MissingTtlConfiguration { .. }
        ));
        assert_eq!(
            layer.registry().get("users"),
            Some(TtlPolicy::new(30, TimeUnit::Seconds, BackingStoreKind::Redis))
        );
        assert_eq!(
            layer.registry().get("items"),
            Some(TtlPolicy::new(10, TimeUnit::Hours, BackingStoreKind::Redis))
        );
        assert_eq!(layer.registry().get("orders"), None);
    }

    #[tokio::test]
    async fn test_call_caches_by_directive() {
        let (layer, _) = build(
            Properties::new(),
            DirectiveTable::from_iter([("UserService::find", Directive::new("users", "5"))]),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let name: Result<String, String> = layer
                .call("UserService::find", "42", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("alice".to_owned())
                })
                .await;
            assert_eq!(name.as_deref(), Ok("alice"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undeclared_call_site_is_not_cached() {
        let (layer, _) = build(Properties::new(), DirectiveTable::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let _: Result<u32, String> = layer
                .call("UserService::find", "42", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_declare_after_build() {
        let props = Properties::from_pairs([
            ("cache.default.ttl", "60"),
            ("cache.default.timeUnit", "m"),
        ]);
        let (layer, report) = build(props, DirectiveTable::new());
        assert!(report.is_clean());

        let err = layer
            .declare("OrderService::find", Directive::new("orders", "soon"))
            .unwrap_err();
        assert_eq!(err, ResolveError::MalformedExpression("soon".to_owned()));
        assert!(layer.directive("OrderService::find").is_none());

        let policy = layer
            .declare("OrderService::find", Directive::new("orders", "${cache.orders}"))
            .unwrap();
        assert_eq!(policy, TtlPolicy::new(60, TimeUnit::Minutes, BackingStoreKind::Redis));
        assert_eq!(
            layer.directive("OrderService::find").and_then(|d| d.primary_name().map(str::to_owned)),
            Some("orders".to_owned())
        );
    }

    #[test]
    fn test_refresh_through_layer() {
        let props = Arc::new(Properties::from_pairs([
            ("cache.users.ttl", "30"),
            ("cache.users.timeUnit", "s"),
        ]));
        let (layer, _) = CacheLayer::builder(props.clone())
            .directive("UserService::find", Directive::new("users", "${cache.users}"))
            .build();
        let handle = layer.registry().handle("users").unwrap();

        props.set("cache.users.ttl", "-1");
        let report = layer.refresh();

        assert_eq!(report.updated, vec!["users"]);
        assert!(handle.load().is_disabled());
    }
}
