//! Named min-gap buckets.

use crate::RateLimitError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bucket name for the external price feed (default gap 1200 ms).
pub const PRICE_FEED: &str = "price_feed";

/// Bucket name for the chain explorer API (default gap 200 ms).
pub const CHAIN_EXPLORER: &str = "chain_explorer";

struct BucketState {
    last_call_at: Option<Instant>,
}

struct Bucket {
    min_gap: Duration,
    // Held across the bounded wait below; tokio's mutex is FIFO-fair, which
    // is what gives same-process waiters their ordering guarantee.
    state: tokio::sync::Mutex<BucketState>,
}

impl Bucket {
    fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            state: tokio::sync::Mutex::new(BucketState { last_call_at: None }),
        }
    }
}

/// Registry of named rate buckets, one mutex per bucket.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
}

impl RateLimiter {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry with the two required buckets.
    pub fn with_default_buckets(price_feed_gap: Duration, chain_explorer_gap: Duration) -> Self {
        let limiter = Self::new();
        limiter.register(PRICE_FEED, price_feed_gap);
        limiter.register(CHAIN_EXPLORER, chain_explorer_gap);
        limiter
    }

    /// Registers (or reconfigures) a bucket.
    pub fn register(&self, name: &str, min_gap: Duration) {
        self.buckets
            .write()
            .insert(name.to_string(), Arc::new(Bucket::new(min_gap)));
    }

    /// The configured gap for `name`, if registered.
    pub fn min_gap(&self, name: &str) -> Option<Duration> {
        self.buckets.read().get(name).map(|bucket| bucket.min_gap)
    }

    /// Waits until a call to `name` is allowed, then stamps the bucket.
    ///
    /// Waiters on the same bucket are admitted FIFO. On cancellation the
    /// bucket is left untouched and [`RateLimitError::Cancelled`] is
    /// returned.
    pub async fn acquire(&self, name: &str, ctx: &CancellationToken) -> Result<(), RateLimitError> {
        let bucket = self.lookup(name)?;

        let mut state = tokio::select! {
            state = bucket.state.lock() => state,
            _ = ctx.cancelled() => return Err(RateLimitError::Cancelled),
        };

        let wait = state
            .last_call_at
            .map(|last| (last + bucket.min_gap).saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            tracing::debug!(upstream = name, wait_ms = wait.as_millis() as u64, "rate-limit wait");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = ctx.cancelled() => return Err(RateLimitError::Cancelled),
            }
        }

        state.last_call_at = Some(Instant::now());
        Ok(())
    }

    /// Pushes the bucket into a penalty window: the next caller waits the
    /// full gap measured from `now + penalty`. Applied after an observed 429.
    pub async fn penalize(&self, name: &str, penalty: Duration) -> Result<(), RateLimitError> {
        let bucket = self.lookup(name)?;
        let mut state = bucket.state.lock().await;
        state.last_call_at = Some(Instant::now() + penalty);
        tracing::debug!(upstream = name, penalty_ms = penalty.as_millis() as u64, "rate bucket penalized");
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Arc<Bucket>, RateLimitError> {
        self.buckets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RateLimitError::UnknownUpstream {
                name: name.to_string(),
            })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
