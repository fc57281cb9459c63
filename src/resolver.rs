//! Directive resolution
//!
//! A TTL expression is either a literal amount or an indirection of the form
//! `${cache.<name>}`. Indirections read `<base>.ttl` and `<base>.timeUnit`
//! from configuration and fall back to `cache.default.ttl` and
//! `cache.default.timeUnit` when the per-name value is absent. A present but
//! unparsable value is an error, never replaced by the default.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::{ConfigSource, Directive, ResolveError, TimeUnit, TtlPolicy, TtlRegistry};

static INDIRECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{(cache\.[a-zA-Z][a-zA-Z0-9]*)\}$").expect("indirection pattern is valid")
});

const DEFAULT_TTL_KEY: &str = "cache.default.ttl";
const DEFAULT_TIME_UNIT_KEY: &str = "cache.default.timeUnit";

/// Failures collected while resolving a batch of directives
#[derive(Debug, Default)]
pub struct ResolutionReport {
    /// Cache names that received a policy
    pub registered: Vec<String>,
    /// Call site (or cache name) and the error that stopped it
    pub failed: Vec<(String, ResolveError)>,
}

impl ResolutionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turns directives into TTL policies
#[derive(Clone)]
pub struct DirectiveResolver {
    config: Arc<dyn ConfigSource>,
}

impl DirectiveResolver {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }

    pub fn resolve(&self, directive: &Directive) -> Result<TtlPolicy, ResolveError> {
        let expr = directive.ttl.as_str();

        let (amount, unit) = if is_literal(expr) {
            let amount = parse_amount("ttl", expr)?;
            (amount, directive.time_unit.unwrap_or_default())
        } else {
            let base = INDIRECTION
                .captures(expr)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
                .ok_or_else(|| ResolveError::MalformedExpression(expr.to_owned()))?;
            (self.resolve_ttl(base)?, self.resolve_time_unit(base)?)
        };

        Ok(TtlPolicy::new(amount, unit, directive.backing_store))
    }

    /// Resolve a directive and register its policy under the first cache name
    pub fn register(
        &self,
        directive: &Directive,
        registry: &TtlRegistry,
    ) -> Result<TtlPolicy, ResolveError> {
        let name = directive.primary_name().ok_or(ResolveError::MissingCacheName)?;
        let policy = self.resolve(directive)?;
        registry.upsert(name, policy);
        debug!(
            "Added cache configuration for {} (key {:?}): {}",
            name, directive.key, policy
        );
        Ok(policy)
    }

    /// Register every directive; a failure only affects its own directive
    pub fn register_all<'a, I>(&self, directives: I, registry: &TtlRegistry) -> ResolutionReport
    where
        I: IntoIterator<Item = (&'a str, &'a Directive)>,
    {
        let mut report = ResolutionReport::default();
        for (call_site, directive) in directives {
            match self.register(directive, registry) {
                Ok(_) => {
                    if let Some(name) = directive.primary_name() {
                        report.registered.push(name.to_owned());
                    }
                }
                Err(e) => {
                    warn!("Failed to resolve cache directive for {}: {}", call_site, e);
                    report.failed.push((call_site.to_owned(), e));
                }
            }
        }
        report
    }

    /// TTL amount for a property base such as `cache.users`
    pub fn resolve_ttl(&self, base: &str) -> Result<i64, ResolveError> {
        let key = format!("{base}.ttl");
        let own = self.config.get_property(&key);
        self.ttl_or_default(base, &key, own)
    }

    /// Time unit for a property base such as `cache.users`
    pub fn resolve_time_unit(&self, base: &str) -> Result<TimeUnit, ResolveError> {
        let own = self.config.get_property(&format!("{base}.timeUnit"));
        self.time_unit_or_default(base, own)
    }

    /// Use `value` when present, otherwise `cache.default.ttl`
    pub(crate) fn ttl_or_default(
        &self,
        base: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<i64, ResolveError> {
        if let Some(value) = value {
            return parse_amount(key, &value);
        }
        warn!("There is no {}.ttl property", base);
        let value = self
            .config
            .get_property(DEFAULT_TTL_KEY)
            .ok_or_else(|| ResolveError::MissingTtlConfiguration {
                base: base.to_owned(),
            })?;
        parse_amount(DEFAULT_TTL_KEY, &value)
    }

    /// Use `value` when present, otherwise `cache.default.timeUnit`
    pub(crate) fn time_unit_or_default(
        &self,
        base: &str,
        value: Option<String>,
    ) -> Result<TimeUnit, ResolveError> {
        if let Some(value) = value {
            return TimeUnit::parse_token(value.trim());
        }
        warn!("There is no {}.timeUnit property", base);
        let value = self
            .config
            .get_property(DEFAULT_TIME_UNIT_KEY)
            .ok_or_else(|| ResolveError::MissingTimeUnitConfiguration {
                base: base.to_owned(),
            })?;
        TimeUnit::parse_token(value.trim())
    }

    pub(crate) fn config(&self) -> &dyn ConfigSource {
        self.config.as_ref()
    }
}

fn is_literal(expr: &str) -> bool {
    expr.chars().all(|c| c.is_ascii_digit())
}

fn parse_amount(key: &str, value: &str) -> Result<i64, ResolveError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ResolveError::InvalidTtlValue {
            key: key.to_owned(),
            value: value.to_owned(),
        })
}
