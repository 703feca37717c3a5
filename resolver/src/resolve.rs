use crate::local_cache::LocalCache;
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, LOOKUP_DURATION, REQUESTS, RESOLVE_DURATION};
use crate::shared_cache::{SharedCache, SharedCacheError};
use crate::store::RouteStore;
use shared::metrics::Metrics;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ResolveError {
    /// Every tier was consulted and none holds the key. A legitimate
    /// routing outcome, not a fault.
    #[error("no project mapped to route key")]
    RouteNotFound,

    /// The final tier could not answer. "Absent" and "unreachable" are
    /// indistinguishable there, so the failure surfaces instead of
    /// masquerading as a miss.
    #[error("resolution unavailable: {0}")]
    Unavailable(String),
}

const TIER_LOCAL: &str = "local";
const TIER_REDIS: &str = "redis";
const TIER_DATABASE: &str = "database";

/// The lookup path every inbound request traverses.
///
/// Tiers are consulted in strictly increasing cost order (in-process
/// table, shared Redis, per-project authoritative stores) and whichever
/// tier answers, every cheaper tier is populated on the way out, so
/// repeated lookups for a key converge to the local tier no matter where
/// the first answer came from. A lookup never writes to a tier more
/// expensive than the one that answered it.
///
/// Tier failures stay tier-local: a shared-tier outage degrades the
/// lookup to the store rather than deciding it. Each promotion write is
/// its own independently-locked step, so interleaved resolutions of the
/// same key can only overwrite each other with the same value, and an
/// abandoned resolution forgoes a promotion without corrupting anything.
#[derive(Clone)]
pub struct Resolver {
    local: LocalCache,
    shared: Arc<dyn SharedCache>,
    store: Arc<dyn RouteStore>,
    metrics: Metrics,
}

impl Resolver {
    pub fn new(
        local: LocalCache,
        shared: Arc<dyn SharedCache>,
        store: Arc<dyn RouteStore>,
        metrics: Metrics,
    ) -> Self {
        Resolver {
            local,
            shared,
            store,
            metrics,
        }
    }

    pub async fn resolve(&self, key: &str) -> Result<String, ResolveError> {
        let started = Instant::now();

        if let Some(project) = self.local.get(key) {
            self.metrics.incr(CACHE_HIT.name, &[("tier", TIER_LOCAL)]);
            self.finish(started, &project, TIER_LOCAL);
            return Ok(project);
        }
        self.metrics.incr(CACHE_MISS.name, &[("tier", TIER_LOCAL)]);

        match self.shared.get(key).await {
            Ok(project) => {
                self.local.set(key, &project);
                self.metrics.incr(CACHE_HIT.name, &[("tier", TIER_REDIS)]);
                self.finish(started, &project, TIER_REDIS);
                return Ok(project);
            }
            Err(SharedCacheError::NotFound) => {}
            Err(SharedCacheError::Unavailable(reason)) => {
                // Degrade to the authoritative tier; the shared cache
                // being down must not decide the resolution.
                tracing::warn!(key, reason = %reason, "shared cache unavailable, falling through");
            }
        }
        self.metrics.incr(CACHE_MISS.name, &[("tier", TIER_REDIS)]);

        match self.store.lookup(key).await {
            Ok(Some(project)) => {
                if let Err(err) = self.shared.set(key, &project).await {
                    tracing::warn!(key, error = %err, "could not promote route to shared cache");
                }
                self.local.set(key, &project);
                self.metrics.incr(CACHE_HIT.name, &[("tier", TIER_DATABASE)]);
                self.finish(started, &project, TIER_DATABASE);
                Ok(project)
            }
            Ok(None) => {
                self.metrics.incr(CACHE_MISS.name, &[("tier", TIER_DATABASE)]);
                self.metrics.incr(
                    REQUESTS.name,
                    &[("project", "none"), ("result", "miss"), ("status", "not_found")],
                );
                self.metrics
                    .timing(LOOKUP_DURATION.name, started.elapsed(), &[("result", "miss")]);
                Err(ResolveError::RouteNotFound)
            }
            Err(err) => {
                self.metrics.incr(
                    REQUESTS.name,
                    &[("project", "none"), ("result", "error"), ("status", "unavailable")],
                );
                Err(ResolveError::Unavailable(err.to_string()))
            }
        }
    }

    /// Administrative cache-bust for a key whose mapping changed outside
    /// the sync cadence.
    ///
    /// The local drop only reaches this instance; other instances
    /// converge as their TTL lapses, which is what bounds worst-case
    /// staleness at local TTL + sync interval. A shared-tier failure
    /// surfaces so the caller can retry.
    pub async fn invalidate(&self, key: &str) -> Result<(), ResolveError> {
        self.local.delete(key);
        match self.shared.delete(key).await {
            Ok(()) | Err(SharedCacheError::NotFound) => Ok(()),
            Err(SharedCacheError::Unavailable(reason)) => Err(ResolveError::Unavailable(reason)),
        }
    }

    /// First-tier cache, exposed for lifecycle control.
    pub fn local_cache(&self) -> &LocalCache {
        &self.local
    }

    fn finish(&self, started: Instant, project: &str, tier: &str) {
        let elapsed = started.elapsed();
        self.metrics.incr(
            REQUESTS.name,
            &[("project", project), ("result", tier), ("status", "ok")],
        );
        self.metrics
            .timing(RESOLVE_DURATION.name, elapsed, &[("project", project)]);
        self.metrics
            .timing(LOOKUP_DURATION.name, elapsed, &[("result", tier)]);
    }
}
