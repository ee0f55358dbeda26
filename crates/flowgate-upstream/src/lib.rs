//! External API gateway for the flowgate engine.
//!
//! Wraps every upstream read in one uniform protocol:
//!
//! 1. Serve a fresh cache entry when present.
//! 2. Otherwise wait on the upstream's rate bucket, then make the call under
//!    a timeout.
//! 3. Cache and return the payload on success.
//! 4. Retry retryable failures (429, 5xx, timeouts) with exponential backoff;
//!    a 429 additionally pushes the rate bucket into a penalty window.
//! 5. When retries exhaust, serve the stale cache entry if one exists, else a
//!    deterministic per-operation fallback constant; both are flagged on the
//!    returned [`Fetched`] so nothing upstack substitutes values silently.
//!
//! Non-429 4xx responses and oversized payloads are permanent: no retry, no
//! cache write, surfaced to the caller. A cancelled call never writes to the
//! cache.
//!
//! Upstreams are capability traits ([`PriceFeed`], [`ChainExplorer`],
//! [`ChainNode`], [`GraphSource`], [`DocumentSource`]); the [`http`] module
//! carries the production reqwest clients for the HTTP ones.

mod error;
mod fallback;
mod gateway;
pub mod http;
mod sources;

pub use error::UpstreamError;
pub use fallback::FallbackTable;
pub use gateway::{
    ApiGateway, FetchPolicy, FetchPolicyBuilder, Fetched, GatewayEvent, DASHBOARD_STATS_FRESH_TTL,
    GAS_TRACKER_FRESH_TTL, NETWORK_STATS_FRESH_TTL, POPULAR_WALLETS_FRESH_TTL, PRICE_FRESH_TTL,
    RISK_SCORE_FRESH_TTL, TRANSACTION_DATA_FRESH_TTL, WALLET_NETWORK_FRESH_TTL,
    WALLET_RANKINGS_FRESH_TTL,
};
pub use sources::{ChainExplorer, ChainNode, DocumentSource, GraphSource, PriceFeed, Sources};
