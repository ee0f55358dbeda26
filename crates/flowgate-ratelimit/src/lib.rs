//! Per-upstream rate limiting for the flowgate engine.
//!
//! Each external upstream gets a named bucket enforcing a minimum gap between
//! successive calls from this process. Waiters on the same bucket are served
//! FIFO; waiting respects cancellation; a 429 from the upstream can push the
//! bucket into a penalty window.
//!
//! There is deliberately no cross-process coordination: deployments pin
//! outbound API calls to one instance, and slight over-rate across replicas
//! is absorbed by the gateway's 429 handling.
//!
//! # Examples
//!
//! ```
//! use flowgate_ratelimit::{RateLimiter, PRICE_FEED};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), flowgate_ratelimit::RateLimitError> {
//! let limiter = RateLimiter::with_default_buckets(
//!     Duration::from_millis(1200),
//!     Duration::from_millis(200),
//! );
//!
//! let ctx = CancellationToken::new();
//! limiter.acquire(PRICE_FEED, &ctx).await?;
//! // ... call the price feed ...
//! # Ok(())
//! # }
//! ```

mod error;
mod limiter;

pub use error::RateLimitError;
pub use limiter::{RateLimiter, CHAIN_EXPLORER, PRICE_FEED};
