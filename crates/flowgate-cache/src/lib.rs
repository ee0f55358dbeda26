//! Cache store for the flowgate engine.
//!
//! Fronts every expensive read with a typed key→value store over the shared
//! key-value backend:
//!
//! - **Two TTLs**: entries are fresh up to `fresh_ttl`, then readable as
//!   stale up to `hard_ttl` (the store's own expiry), after which they are
//!   gone. The freshness decision is encoded entirely in the returned
//!   [`CacheHit`] so callers never re-implement the policy.
//! - **Single-flight tokens**: an atomic set-if-absent marker per key so at
//!   most one caller per process fetches a missing entry.
//! - **Counter windows**: atomic increment with first-write expiry, backing
//!   request rate-limit checks.
//!
//! The cache is never authoritative: store errors surface as [`CacheError`]
//! and readers above this crate treat them as misses.
//!
//! # Examples
//!
//! ```
//! use flowgate_cache::{CacheDomain, CacheKey, CacheStore};
//! use flowgate_core::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), flowgate_cache::CacheError> {
//! let cache = CacheStore::new(Arc::new(MemoryStore::new()));
//! let key = CacheKey::new(CacheDomain::MarketData).arg("price").arg("eth");
//!
//! cache
//!     .set(&key, &42u64, Duration::from_secs(300), Duration::from_secs(600))
//!     .await?;
//!
//! let hit = cache.get::<u64>(&key, false).await?.expect("fresh");
//! assert_eq!(hit.payload, 42);
//! assert!(!hit.stale);
//! # Ok(())
//! # }
//! ```

mod error;
mod key;
mod store;
mod ttl;

pub use error::CacheError;
pub use key::{CacheDomain, CacheKey};
pub use store::{CacheHit, CacheStats, CacheStore};
pub use ttl::TtlPolicy;
