//! # Tenant Configuration Resolver
//!
//! Resolves a routing key to a `TenantConfig` through a TTL cache in front of a
//! `ConfigStore`.
//!
//! ## Outcomes:
//! - **Ok(config)**: active mapping, active tenant, configuration present
//! - **NotFound**: any of the above missing; callers cannot tell which
//! - **Unavailable**: the store could not be reached; retry with `resolve_with_retry`
//!
//! ## Cache policy:
//! - Only successful resolutions are cached
//! - Entries expire after the TTL and are dropped lazily on the next lookup
//! - Concurrent misses for the same key both hit the store; the last write wins

use crate::config::ResolverConfig;
use crate::error::{ResolveError, StoreError};
use crate::tenant::model::{RoutingKey, TenantConfig};
use crate::tenant::store::ConfigStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct CacheEntry {
    config: Arc<TenantConfig>,
    stored_at: Instant,
}

/// Snapshot of the cache, served by the admin endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub ttl_seconds: u64,
}

/// Exponential backoff between store attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&ResolverConfig> for RetryPolicy {
    fn from(value: &ResolverConfig) -> Self {
        let initial_backoff_ms = value.initial_backoff_ms.max(1);
        let max_backoff_ms = value.max_backoff_ms.max(initial_backoff_ms);
        Self {
            max_retries: value.max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based). Attempt 0 is the first try.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1u128 << exponent;
        let backoff_ms = self.initial_backoff.as_millis().saturating_mul(multiplier);
        let bounded_ms = backoff_ms.min(self.max_backoff.as_millis());
        Duration::from_millis(bounded_ms as u64)
    }
}

pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    cache: RwLock<HashMap<RoutingKey, CacheEntry>>,
    ttl: Duration,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve once: cache, then store.
    pub async fn resolve(&self, key: &RoutingKey) -> Result<Arc<TenantConfig>, ResolveError> {
        if let Some(config) = self.cached(key) {
            debug!(routing_key = %key, "Tenant cache hit");
            return Ok(config);
        }

        info!(routing_key = %key, "Fetching tenant configuration from store");
        let config = Arc::new(self.load(key).await?);
        self.cache.write().unwrap().insert(
            key.clone(),
            CacheEntry {
                config: config.clone(),
                stored_at: Instant::now(),
            },
        );
        debug!(routing_key = %key, "Tenant configuration cached");
        Ok(config)
    }

    /// Resolve, retrying `Unavailable` per `policy`. `NotFound` is returned immediately.
    pub async fn resolve_with_retry(
        &self,
        key: &RoutingKey,
        policy: &RetryPolicy,
    ) -> Result<Arc<TenantConfig>, ResolveError> {
        let mut attempt = 0;
        loop {
            match self.resolve(key).await {
                Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                    attempt += 1;
                    let backoff = policy.backoff_for_attempt(attempt);
                    warn!(
                        routing_key = %key,
                        attempt = attempt,
                        max_retries = policy.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Tenant resolution failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Drop one key, or everything when `key` is `None`. Returns the number of entries removed.
    pub fn invalidate(&self, key: Option<&RoutingKey>) -> usize {
        let mut cache = self.cache.write().unwrap();
        match key {
            Some(key) => {
                let removed = cache.remove(key).is_some() as usize;
                info!(routing_key = %key, removed = removed, "Tenant cache invalidated");
                removed
            }
            None => {
                let removed = cache.len();
                cache.clear();
                info!(removed = removed, "Tenant cache cleared");
                removed
            }
        }
    }

    /// Force a fresh read from the store.
    pub async fn refresh(&self, key: &RoutingKey) -> Result<Arc<TenantConfig>, ResolveError> {
        self.invalidate(Some(key));
        self.resolve(key).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.read().unwrap();
        let valid_entries = cache
            .values()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .count();
        CacheStats {
            total_entries: cache.len(),
            valid_entries,
            expired_entries: cache.len() - valid_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    fn cached(&self, key: &RoutingKey) -> Option<Arc<TenantConfig>> {
        {
            let cache = self.cache.read().unwrap();
            match cache.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.config.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut cache = self.cache.write().unwrap();
        if cache
            .get(key)
            .is_some_and(|entry| entry.stored_at.elapsed() >= self.ttl)
        {
            cache.remove(key);
            debug!(routing_key = %key, "Expired tenant cache entry dropped");
        }
        None
    }

    async fn load(&self, key: &RoutingKey) -> Result<TenantConfig, ResolveError> {
        let outcome = async {
            let Some(tenant) = self.store.lookup(key).await? else {
                return Ok(None);
            };
            Ok::<_, StoreError>(self.store.fetch(&tenant).await?.filter(|c| c.active))
        }
        .await;

        match outcome {
            Ok(Some(config)) => Ok(config),
            Ok(None) => {
                warn!(routing_key = %key, "No active tenant configuration");
                Err(ResolveError::NotFound)
            }
            Err(StoreError::Malformed(reason)) => {
                error!(routing_key = %key, reason = %reason, "Malformed tenant record");
                Err(ResolveError::NotFound)
            }
            Err(StoreError::Unavailable(reason)) => Err(ResolveError::Unavailable(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_config, MemoryStore};

    fn key(raw: &str) -> RoutingKey {
        RoutingKey::parse(raw).unwrap()
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_resolves_and_caches() {
        let store = Arc::new(MemoryStore::new());
        store.add_tenant("+5511999990001", "clinica", sample_config("pt-BR-FranciscaNeural"));
        let resolver = ConfigResolver::new(store.clone(), Duration::from_secs(60));

        let first = resolver.resolve(&key("+5511999990001")).await.unwrap();
        let second = resolver.resolve(&key("+5511999990001")).await.unwrap();

        assert_eq!(first.voice.name, "pt-BR-FranciscaNeural");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.lookup_count(), 1);
        assert_eq!(resolver.cache_stats().valid_entries, 1);
    }

    #[tokio::test]
    async fn test_missing_inactive_and_unconfigured_all_not_found() {
        let store = Arc::new(MemoryStore::new());
        store.add_tenant("+1", "a", sample_config("v"));
        store.deactivate_route("+1");
        store.add_tenant("+2", "b", sample_config("v"));
        store.deactivate_tenant("b");
        store.add_route_only("+3", "c");

        let resolver = ConfigResolver::new(store, Duration::from_secs(60));
        for raw in ["+1", "+2", "+3", "+4"] {
            assert_eq!(resolver.resolve(&key(raw)).await, Err(ResolveError::NotFound));
        }
        assert_eq!(resolver.cache_stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let store = Arc::new(MemoryStore::new());
        store.add_tenant("+1", "a", sample_config("v"));
        let resolver = ConfigResolver::new(store.clone(), Duration::from_millis(20));

        resolver.resolve(&key("+1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(resolver.cache_stats().expired_entries, 1);

        resolver.resolve(&key("+1")).await.unwrap();
        assert_eq!(store.lookup_count(), 2);
        assert_eq!(resolver.cache_stats().valid_entries, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_refresh() {
        let store = Arc::new(MemoryStore::new());
        store.add_tenant("+1", "a", sample_config("v1"));
        store.add_tenant("+2", "b", sample_config("v2"));
        let resolver = ConfigResolver::new(store.clone(), Duration::from_secs(60));
        resolver.resolve(&key("+1")).await.unwrap();
        resolver.resolve(&key("+2")).await.unwrap();

        assert_eq!(resolver.invalidate(Some(&key("+1"))), 1);
        assert_eq!(resolver.invalidate(Some(&key("+1"))), 0);
        assert_eq!(resolver.cache_stats().total_entries, 1);

        store.add_tenant("+2", "b", sample_config("v2-new"));
        let refreshed = resolver.refresh(&key("+2")).await.unwrap();
        assert_eq!(refreshed.voice.name, "v2-new");

        assert_eq!(resolver.invalidate(None), 1);
        assert_eq!(resolver.cache_stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_store_outage_is_distinct_and_retried() {
        let store = Arc::new(MemoryStore::new());
        store.add_tenant("+1", "a", sample_config("v"));
        store.fail_next_lookups(3);
        let resolver = ConfigResolver::new(store.clone(), Duration::from_secs(60));

        let config = resolver
            .resolve_with_retry(&key("+1"), &policy(3))
            .await
            .unwrap();
        assert_eq!(config.voice.name, "v");
        assert_eq!(store.lookup_count(), 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let store = Arc::new(MemoryStore::new());
        store.add_tenant("+1", "a", sample_config("v"));
        store.fail_next_lookups(5);
        let resolver = ConfigResolver::new(store.clone(), Duration::from_secs(60));

        let err = resolver
            .resolve_with_retry(&key("+1"), &policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unavailable(_)));
        assert_eq!(store.lookup_count(), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let resolver = ConfigResolver::new(store.clone(), Duration::from_secs(60));
        let err = resolver
            .resolve_with_retry(&key("+9"), &policy(3))
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::NotFound);
        assert_eq!(store.lookup_count(), 1);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::from(&ResolverConfig {
            cache_ttl_secs: 300,
            max_retries: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 1_000,
        });
        assert_eq!(policy.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(1_000));
    }
}
