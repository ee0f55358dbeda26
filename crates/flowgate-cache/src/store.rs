//! The cache store itself.

use crate::{CacheError, CacheKey};
use flowgate_core::{now_ms, KeyValueStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Wrapper stored under every cache key.
///
/// The shared store's own expiry carries the hard TTL; the wrapper carries
/// what is needed to decide freshness at read time.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: serde_json::Value,
    stored_at_ms: u64,
    fresh_ttl_ms: u64,
}

/// A successful cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<T> {
    /// The cached payload.
    pub payload: T,
    /// How long ago the entry was stored.
    pub age: Duration,
    /// True when the entry is past its fresh TTL and was returned only
    /// because the caller allowed stale reads.
    pub stale: bool,
}

/// Snapshot of the store's read counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh hits.
    pub hits: u64,
    /// Misses (absent, expired, or fresh-only reads of stale entries).
    pub misses: u64,
    /// Stale hits served with `allow_stale`.
    pub stale_hits: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
}

/// Typed key→value store with a two-TTL freshness window over the shared
/// key-value backend.
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    counters: Counters,
}

impl CacheStore {
    /// Creates a cache store over the given backend.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            counters: Counters::default(),
        }
    }

    /// The underlying shared-store handle.
    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    /// Writes `payload` under `key`, fresh for `fresh_ttl` and readable as
    /// stale up to `hard_ttl`.
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        fresh_ttl: Duration,
        hard_ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write_entry(key, payload, fresh_ttl, hard_ttl, now_ms())
            .await
    }

    /// Writes an entry with an explicit `stored_at_ms` timestamp.
    ///
    /// The store expiry is the remainder of the hard window measured from
    /// `stored_at_ms`; an entry already past its hard TTL is not written.
    /// Used by backfill paths and tests that need to seed aged entries.
    pub async fn write_entry<T: Serialize>(
        &self,
        key: &CacheKey,
        payload: &T,
        fresh_ttl: Duration,
        hard_ttl: Duration,
        stored_at_ms: u64,
    ) -> Result<(), CacheError> {
        if fresh_ttl > hard_ttl {
            return Err(CacheError::InvalidTtl {
                fresh_ms: fresh_ttl.as_millis() as u64,
                hard_ms: hard_ttl.as_millis() as u64,
            });
        }
        let now = now_ms();
        let remaining = (stored_at_ms + hard_ttl.as_millis() as u64).saturating_sub(now);
        if remaining == 0 {
            tracing::debug!(key = %key, "skipping write of entry already past its hard ttl");
            return Ok(());
        }
        let envelope = Envelope {
            payload: serde_json::to_value(payload)?,
            stored_at_ms,
            fresh_ttl_ms: fresh_ttl.as_millis() as u64,
        };
        let raw = serde_json::to_string(&envelope)?;
        self.store
            .set_ex(key.as_str(), &raw, Duration::from_millis(remaining))
            .await?;
        Ok(())
    }

    /// Reads `key`, returning `None` on a miss.
    ///
    /// A stale entry (past fresh TTL, within hard TTL) is a miss unless
    /// `allow_stale` is set, in which case it is returned with
    /// [`CacheHit::stale`] set.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        allow_stale: bool,
    ) -> Result<Option<CacheHit<T>>, CacheError> {
        let raw = match self.store.get(key.as_str()).await? {
            Some(raw) => raw,
            None => {
                self.record_miss(key);
                return Ok(None);
            }
        };
        let envelope: Envelope = serde_json::from_str(&raw)?;
        let age_ms = now_ms().saturating_sub(envelope.stored_at_ms);
        let stale = age_ms > envelope.fresh_ttl_ms;
        if stale && !allow_stale {
            self.record_miss(key);
            return Ok(None);
        }

        if stale {
            self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("flowgate_cache_stale_hits_total", "domain" => key.domain().as_str())
                .increment(1);
            tracing::debug!(key = %key, age_ms, "cache stale hit");
        } else {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("flowgate_cache_hits_total", "domain" => key.domain().as_str()).increment(1);
            tracing::debug!(key = %key, age_ms, "cache hit");
        }

        Ok(Some(CacheHit {
            payload: serde_json::from_value(envelope.payload)?,
            age: Duration::from_millis(age_ms),
            stale,
        }))
    }

    /// Deletes the given keys, returning how many existed.
    pub async fn delete(&self, keys: &[&CacheKey]) -> Result<u64, CacheError> {
        let raw: Vec<&str> = keys.iter().map(|key| key.as_str()).collect();
        Ok(self.store.del(&raw).await?)
    }

    /// Whether `key` currently holds an entry (fresh or stale).
    pub async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.store.exists(key.as_str()).await?)
    }

    /// Batch write: every entry shares the same TTL pair.
    pub async fn set_many<T: Serialize>(
        &self,
        entries: &[(CacheKey, T)],
        fresh_ttl: Duration,
        hard_ttl: Duration,
    ) -> Result<(), CacheError> {
        for (key, payload) in entries {
            self.set(key, payload, fresh_ttl, hard_ttl).await?;
        }
        Ok(())
    }

    /// Batch read; result slots line up with the requested keys.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        keys: &[&CacheKey],
        allow_stale: bool,
    ) -> Result<Vec<Option<CacheHit<T>>>, CacheError> {
        let mut hits = Vec::with_capacity(keys.len());
        for key in keys {
            hits.push(self.get(key, allow_stale).await?);
        }
        Ok(hits)
    }

    /// Atomically claims the single-flight token for `key`.
    ///
    /// Returns whether this caller won; the token expires on its own after
    /// `lease` if the winner never releases it.
    pub async fn acquire_single_flight(
        &self,
        key: &CacheKey,
        lease: Duration,
    ) -> Result<bool, CacheError> {
        let won = self
            .store
            .set_nx_ex(&key.single_flight(), "1", lease)
            .await?;
        if won {
            tracing::debug!(key = %key, "single-flight token acquired");
        }
        Ok(won)
    }

    /// Releases the single-flight token for `key`. Unconditional delete.
    pub async fn release_single_flight(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.store.del(&[key.single_flight().as_str()]).await?;
        Ok(())
    }

    /// Counts a request against `key`'s window; returns whether the count is
    /// still within `limit`.
    pub async fn rate_limit_check(
        &self,
        key: &CacheKey,
        limit: u64,
        window: Duration,
    ) -> Result<bool, CacheError> {
        let count = self.store.incr_ex(key.as_str(), window).await?;
        Ok(count <= limit)
    }

    /// Snapshot of the read counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_hits: self.counters.stale_hits.load(Ordering::Relaxed),
        }
    }

    fn record_miss(&self, key: &CacheKey) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("flowgate_cache_misses_total", "domain" => key.domain().as_str()).increment(1);
        tracing::debug!(key = %key, "cache miss");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheDomain;
    use flowgate_core::MemoryStore;
    use serde_json::json;

    fn cache() -> CacheStore {
        CacheStore::new(Arc::new(MemoryStore::new()))
    }

    fn price_key() -> CacheKey {
        CacheKey::new(CacheDomain::MarketData).arg("price").arg("eth")
    }

    #[tokio::test]
    async fn set_then_get_is_a_fresh_hit() {
        let cache = cache();
        let key = price_key();
        cache
            .set(
                &key,
                &json!({"usd": 3000.0}),
                Duration::from_secs(300),
                Duration::from_secs(600),
            )
            .await
            .unwrap();

        let hit = cache
            .get::<serde_json::Value>(&key, false)
            .await
            .unwrap()
            .expect("fresh hit");
        assert_eq!(hit.payload, json!({"usd": 3000.0}));
        assert!(!hit.stale);
        assert!(hit.age < Duration::from_secs(1));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn absent_key_is_a_miss() {
        let cache = cache();
        let hit = cache.get::<serde_json::Value>(&price_key(), false).await.unwrap();
        assert!(hit.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn stale_entry_is_a_miss_unless_allowed() {
        let cache = cache();
        let key = price_key();
        // Stored 400 s ago with a 300 s fresh window: stale, within hard.
        cache
            .write_entry(
                &key,
                &json!({"usd": 2999.0}),
                Duration::from_secs(300),
                Duration::from_secs(600),
                now_ms() - 400_000,
            )
            .await
            .unwrap();

        assert!(cache
            .get::<serde_json::Value>(&key, false)
            .await
            .unwrap()
            .is_none());

        let hit = cache
            .get::<serde_json::Value>(&key, true)
            .await
            .unwrap()
            .expect("stale hit");
        assert!(hit.stale);
        assert_eq!(hit.payload, json!({"usd": 2999.0}));
        assert!(hit.age >= Duration::from_secs(400));
        assert_eq!(cache.stats().stale_hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn entry_past_hard_ttl_is_gone_even_for_stale_readers() {
        let cache = cache();
        let key = price_key();
        cache
            .write_entry(
                &key,
                &json!({"usd": 1.0}),
                Duration::from_secs(300),
                Duration::from_secs(600),
                now_ms() - 700_000,
            )
            .await
            .unwrap();

        assert!(cache
            .get::<serde_json::Value>(&key, true)
            .await
            .unwrap()
            .is_none());
        assert!(!cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn replacement_overwrites_in_place() {
        let cache = cache();
        let key = price_key();
        cache
            .set(&key, &json!({"usd": 1.0}), Duration::from_secs(10), Duration::from_secs(20))
            .await
            .unwrap();
        cache
            .set(&key, &json!({"usd": 2.0}), Duration::from_secs(10), Duration::from_secs(20))
            .await
            .unwrap();

        let hit = cache
            .get::<serde_json::Value>(&key, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.payload, json!({"usd": 2.0}));
    }

    #[tokio::test]
    async fn invalid_ttl_pair_is_rejected() {
        let cache = cache();
        let err = cache
            .set(
                &price_key(),
                &json!(1),
                Duration::from_secs(600),
                Duration::from_secs(300),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidTtl { .. }));
    }

    #[tokio::test]
    async fn delete_and_exists() {
        let cache = cache();
        let key = price_key();
        cache
            .set(&key, &json!(1), Duration::from_secs(10), Duration::from_secs(20))
            .await
            .unwrap();
        assert!(cache.exists(&key).await.unwrap());
        assert_eq!(cache.delete(&[&key]).await.unwrap(), 1);
        assert!(!cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn batch_roundtrip() {
        let cache = cache();
        let a = CacheKey::new(CacheDomain::RiskScore).arg("0xa");
        let b = CacheKey::new(CacheDomain::RiskScore).arg("0xb");
        cache
            .set_many(
                &[(a.clone(), json!(10)), (b.clone(), json!(20))],
                Duration::from_secs(10),
                Duration::from_secs(20),
            )
            .await
            .unwrap();

        let missing = CacheKey::new(CacheDomain::RiskScore).arg("0xc");
        let hits = cache
            .get_many::<serde_json::Value>(&[&a, &b, &missing], false)
            .await
            .unwrap();
        assert_eq!(hits[0].as_ref().unwrap().payload, json!(10));
        assert_eq!(hits[1].as_ref().unwrap().payload, json!(20));
        assert!(hits[2].is_none());
    }

    #[tokio::test]
    async fn single_flight_admits_exactly_one_winner() {
        let cache = cache();
        let key = price_key();
        assert!(cache
            .acquire_single_flight(&key, Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!cache
            .acquire_single_flight(&key, Duration::from_secs(10))
            .await
            .unwrap());

        cache.release_single_flight(&key).await.unwrap();
        assert!(cache
            .acquire_single_flight(&key, Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn single_flight_lease_expires_on_its_own() {
        let cache = cache();
        let key = price_key();
        assert!(cache
            .acquire_single_flight(&key, Duration::from_millis(10))
            .await
            .unwrap());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache
            .acquire_single_flight(&key, Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rate_limit_check_counts_against_the_window() {
        let cache = cache();
        let key = CacheKey::new(CacheDomain::RateLimit).arg("client-1");
        for _ in 0..3 {
            assert!(cache
                .rate_limit_check(&key, 3, Duration::from_secs(60))
                .await
                .unwrap());
        }
        assert!(!cache
            .rate_limit_check(&key, 3, Duration::from_secs(60))
            .await
            .unwrap());
    }
}
