//! Tier cache: in-process mirror of the current tier with TTL expiration.
//!
//! Readers that only need "what tier are we on" hit this instead of the
//! controller. Entries expire after the TTL given at write time and are
//! removed eagerly on the next read. Hit/miss counters are emitted as
//! `tracing::debug` fields.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use tierscale_core::{BoxFuture, CacheMirror, CachedTier, CollabResult};

struct CacheEntry {
    value: CachedTier,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Shared TTL cache keyed by string.
#[derive(Clone, Default)]
pub struct TierCache {
    inner: Arc<Mutex<Inner>>,
}

impl TierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key` for `ttl`.
    pub async fn insert(&self, key: &str, value: CachedTier, ttl: Duration) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Look up a key. Expired entries count as a miss and are dropped.
    pub async fn get(&self, key: &str) -> Option<CachedTier> {
        let mut inner = self.inner.lock().await;
        let live = match inner.entries.get(key).map(CacheEntry::is_expired) {
            Some(false) => inner.entries.get(key).map(|e| e.value.clone()),
            Some(true) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };

        if live.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        debug!(
            %key,
            hit = live.is_some(),
            cache_hits = inner.hits,
            cache_misses = inner.misses,
            "tier cache lookup"
        );
        live
    }

    /// Number of entries, including ones that expired but were not read yet.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CacheMirror for TierCache {
    fn set_current_tier<'a>(
        &'a self,
        key: &'a str,
        value: &'a CachedTier,
        ttl_secs: u64,
    ) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            self.insert(key, value.clone(), Duration::from_secs(ttl_secs)).await;
            Ok(())
        })
    }

    fn health(&self) -> BoxFuture<'_, CollabResult<()>> {
        // In-process; reachable whenever the lock is.
        Box::pin(async move {
            drop(self.inner.lock().await);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierscale_core::ScalingMode;

    fn cached(tier: &str) -> CachedTier {
        CachedTier {
            tier: tier.to_string(),
            mode: ScalingMode::Auto,
            max_tokens: 500_000,
            timestamp: 1000,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = TierCache::new();
        cache
            .insert("current_tier", cached("pyme"), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("current_tier").await, Some(cached("pyme")));
        assert!(cache.get("other").await.is_none());
    }

    #[tokio::test]
    async fn later_insert_replaces_value() {
        let cache = TierCache::new();
        cache.insert("k", cached("free"), Duration::from_secs(60)).await;
        cache.insert("k", cached("mediana"), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.unwrap().tier, "mediana");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_removed_on_read() {
        let cache = TierCache::new();
        cache.insert("k", cached("free"), Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn cache_mirror_contract_uses_ttl_secs() {
        let cache = TierCache::new();
        cache
            .set_current_tier("current_tier", &cached("enterprise"), 3600)
            .await
            .unwrap();
        assert_eq!(cache.get("current_tier").await.unwrap().tier, "enterprise");
        cache.health().await.unwrap();
    }
}
