use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::store::CoordinationStore;

/// Store prefix under which revoked tokens are recorded.
pub const REVOKED_TOKENS_PREFIX: &str = "/revoked-tokens/";

/// How long a cached verdict is trusted.
pub const REVOCATION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Upper bound on cached verdicts.
pub const MAX_CACHED_VERDICTS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct CachedVerdict {
    revoked: bool,
    cached_at: DateTime<Utc>,
}

/// Revoked-token lookups with a short-lived verdict cache in front of the
/// coordination store.
///
/// Both outcomes are cached. Within the freshness window a verdict is served
/// from memory even if the store has changed since.
#[derive(Clone)]
pub struct RevocationCache {
    store: Arc<dyn CoordinationStore>,
    verdicts: Arc<DashMap<String, CachedVerdict>>,
    freshness: chrono::Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl RevocationCache {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            verdicts: Arc::new(DashMap::new()),
            freshness: chrono::Duration::from_std(REVOCATION_CACHE_TTL)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            capacity: MAX_CACHED_VERDICTS,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn marker_path(token: &str) -> String {
        format!("{}{}", REVOKED_TOKENS_PREFIX, token)
    }

    /// Store errors are returned to the caller and never cached.
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        let now = self.clock.now();

        if let Some(verdict) = self.verdicts.get(token).map(|v| *v.value())
            && now - verdict.cached_at < self.freshness
        {
            metrics::counter!("revocation_cache_hits_total").increment(1);
            return Ok(verdict.revoked);
        }

        metrics::counter!("revocation_cache_misses_total").increment(1);
        let revoked = self.store.read(&Self::marker_path(token)).await?.is_some();

        self.make_room(now);
        self.verdicts.insert(
            token.to_string(),
            CachedVerdict {
                revoked,
                cached_at: now,
            },
        );

        Ok(revoked)
    }

    /// Record `token` as revoked for `ttl` and forget any local verdict.
    pub async fn revoke(&self, token: &str, ttl: Duration) -> Result<()> {
        self.store
            .write(&Self::marker_path(token), "1", Some(ttl))
            .await?;
        self.make_room(self.clock.now());
        self.verdicts.insert(
            token.to_string(),
            CachedVerdict {
                revoked: true,
                cached_at: self.clock.now(),
            },
        );
        Ok(())
    }

    pub fn invalidate(&self, token: &str) {
        self.verdicts.remove(token);
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Keep the map below `capacity` before an insert: stale verdicts go
    /// first, then the oldest fresh ones. Dropping a verdict only costs a
    /// store lookup.
    fn make_room(&self, now: DateTime<Utc>) {
        if self.verdicts.len() < self.capacity {
            return;
        }
        let freshness = self.freshness;
        self.verdicts.retain(|_, v| now - v.cached_at < freshness);

        let excess = (self.verdicts.len() + 1).saturating_sub(self.capacity);
        if excess > 0 {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .verdicts
                .iter()
                .map(|entry| (entry.value().cached_at, entry.key().clone()))
                .collect();
            by_age.sort();
            for (_, token) in by_age.into_iter().take(excess) {
                self.verdicts.remove(&token);
            }
        }
        tracing::debug!(remaining = self.verdicts.len(), "Evicted revocation verdicts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    fn cache_with_clock() -> (RevocationCache, InMemoryStore, ManualClock) {
        let clock = ManualClock::default();
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let cache = RevocationCache::new(Arc::new(store.clone())).with_clock(Arc::new(clock.clone()));
        (cache, store, clock)
    }

    #[tokio::test]
    async fn negative_verdict_is_cached_for_the_window() {
        let (cache, store, clock) = cache_with_clock();

        assert!(!cache.is_revoked("tok").await.unwrap());

        // Revoked behind the cache's back.
        store
            .write(&RevocationCache::marker_path("tok"), "1", None)
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(59));
        assert!(!cache.is_revoked("tok").await.unwrap());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.is_revoked("tok").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_writes_leased_marker() {
        let (cache, store, _clock) = cache_with_clock();
        cache.revoke("tok", Duration::from_secs(300)).await.unwrap();

        let stored = store.get("/revoked-tokens/tok").unwrap();
        assert_eq!(stored.ttl, Some(Duration::from_secs(300)));
        assert!(cache.is_revoked("tok").await.unwrap());
    }

    #[tokio::test]
    async fn burst_of_fresh_tokens_stays_within_capacity() {
        let (cache, _store, clock) = cache_with_clock();
        let cache = cache.with_capacity(3);

        for i in 0..10 {
            assert!(!cache.is_revoked(&format!("tok-{}", i)).await.unwrap());
            clock.advance(chrono::Duration::seconds(1));
        }

        assert_eq!(cache.len(), 3);
        // The newest verdicts survive.
        assert!(cache.verdicts.contains_key("tok-9"));
        assert!(!cache.verdicts.contains_key("tok-0"));
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup() {
        let (cache, store, _clock) = cache_with_clock();
        assert!(!cache.is_revoked("tok").await.unwrap());
        store
            .write(&RevocationCache::marker_path("tok"), "1", None)
            .await
            .unwrap();

        cache.invalidate("tok");
        assert!(cache.is_revoked("tok").await.unwrap());
        assert_eq!(cache.len(), 1);
    }
}
