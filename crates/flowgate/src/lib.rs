//! flowgate: a proactive fetch-and-cache engine for blockchain analytics
//! gateways.
//!
//! The engine decouples client read latency from upstream latency by:
//!
//! - fronting every expensive read with a two-TTL cache
//!   ([`flowgate_cache`]), coordinated per key with single-flight tokens
//! - wrapping upstream calls in retry + backoff + stale-serve + fallback
//!   ([`flowgate_upstream`]) behind per-upstream rate limits
//!   ([`flowgate_ratelimit`])
//! - precomputing popular results with cron-scheduled background crawlers
//!   over a priority job queue ([`flowgate_jobs`])
//!
//! This crate ties the pieces together: the [`ReadFacade`] is the stable
//! contract the request layer consumes, and the [`Engine`] is the single
//! process-wide value owning every component, from construction through
//! graceful shutdown.
//!
//! # Examples
//!
//! ```no_run
//! use flowgate::{Engine, EngineConfig};
//! use flowgate_upstream::Sources;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(sources: Sources) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder()
//!     .config(EngineConfig::from_env())
//!     .sources(sources)
//!     .build()?;
//! engine.start().await?;
//!
//! let ctx = CancellationToken::new();
//! let network = engine.facade().get_wallet_network("0xabc", 2, &ctx).await?;
//! println!("degraded: {}", network.degraded);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod facade;
#[cfg(test)]
pub(crate) mod testutil;

pub use config::EngineConfig;
pub use engine::{BuildError, Engine, EngineBuilder, EngineStats};
pub use facade::{ErrorKind, FacadeError, ReadFacade};

pub use flowgate_cache::{CacheDomain, CacheHit, CacheKey, CacheStats, CacheStore, TtlPolicy};
pub use flowgate_core::{now_ms, KeyValueStore, KvError, MemoryStore};
pub use flowgate_jobs::{
    Job, JobKind, JobPayload, JobQueue, JobStatus, Priority, QueueStats,
};
pub use flowgate_ratelimit::{RateLimiter, CHAIN_EXPLORER, PRICE_FEED};
pub use flowgate_upstream::{ApiGateway, FallbackTable, FetchPolicy, Fetched, Sources, UpstreamError};
