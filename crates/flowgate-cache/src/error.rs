use flowgate_core::KvError;
use thiserror::Error;

/// Errors surfaced by the cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The shared store failed; readers should treat this as a miss.
    #[error(transparent)]
    Store(#[from] KvError),

    /// The payload or envelope could not be (de)serialized.
    #[error("cache envelope codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// `fresh_ttl` exceeds `hard_ttl`.
    #[error("fresh ttl {fresh_ms} ms exceeds hard ttl {hard_ms} ms")]
    InvalidTtl {
        /// Requested fresh TTL in milliseconds.
        fresh_ms: u64,
        /// Requested hard TTL in milliseconds.
        hard_ms: u64,
    },
}
