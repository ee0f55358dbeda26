//! The read-through facade: the stable entry point the request layer uses.
//!
//! Every operation is "cache-or-fetch" with per-key single-flight: a fresh
//! cache hit returns immediately; otherwise exactly one caller per process
//! wins the single-flight token and fetches through the gateway while the
//! rest poll the cache with jittered backoff and read the winner's write.
//! Across processes duplication is bounded by the instance count.

use crate::now_ms;
use flowgate_cache::{CacheDomain, CacheHit, CacheKey, CacheStore};
use flowgate_upstream::{ApiGateway, Fetched, UpstreamError};
use rand::Rng;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Failure taxonomy surfaced to the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shared store unreachable (maps to 503 upstack).
    CacheUnavailable,
    /// Upstream rate limiting exhausted every recovery path.
    UpstreamRateLimited,
    /// Transient upstream failure exhausted every recovery path.
    UpstreamTransient,
    /// Non-retryable upstream failure (maps to 502 upstack).
    UpstreamPermanent,
    /// The caller's deadline or context cancelled the read.
    Cancelled,
}

/// A hard failure with its taxonomy kind and a correlation id for log
/// stitching. Degraded results are not errors; they come back as payloads
/// with [`Fetched::degraded`] set.
#[derive(Debug, Clone, Error)]
#[error("{message} [{kind:?}, correlation {correlation_id}]")]
pub struct FacadeError {
    /// Taxonomy kind; the request layer picks the HTTP status.
    pub kind: ErrorKind,
    /// Correlation id, logged on every hop of this failure.
    pub correlation_id: Uuid,
    /// Human-readable detail.
    pub message: String,
}

impl FacadeError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            correlation_id: Uuid::new_v4(),
            message: message.into(),
        }
    }

    fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "read cancelled")
    }

    fn from_upstream(err: UpstreamError) -> Self {
        let kind = match err {
            UpstreamError::RateLimited { .. } => ErrorKind::UpstreamRateLimited,
            UpstreamError::Transient(_) | UpstreamError::Timeout(_) => ErrorKind::UpstreamTransient,
            UpstreamError::Permanent { .. } | UpstreamError::PayloadTooLarge { .. } => {
                ErrorKind::UpstreamPermanent
            }
            UpstreamError::Cancelled => ErrorKind::Cancelled,
        };
        Self::new(kind, err.to_string())
    }
}

/// The read-through facade over cache and gateway.
pub struct ReadFacade {
    cache: Arc<CacheStore>,
    gateway: Arc<ApiGateway>,
    lease: Duration,
    poll_max_wait: Duration,
    price_ids: String,
    vs_currencies: String,
}

impl ReadFacade {
    /// A facade with the default 10 s single-flight lease and 5 s loser
    /// wait.
    pub fn new(cache: Arc<CacheStore>, gateway: Arc<ApiGateway>) -> Self {
        Self {
            cache,
            gateway,
            lease: Duration::from_secs(10),
            poll_max_wait: Duration::from_secs(5),
            price_ids: "ethereum".to_string(),
            vs_currencies: "usd".to_string(),
        }
    }

    /// Overrides the single-flight lease (the maximum expected upstream
    /// latency).
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Overrides how long a losing caller polls before proceeding as the
    /// winner.
    pub fn with_poll_max_wait(mut self, wait: Duration) -> Self {
        self.poll_max_wait = wait;
        self
    }

    /// Overrides the pair composed into `get_market_data`.
    pub fn with_market_pair(mut self, ids: impl Into<String>, vs: impl Into<String>) -> Self {
        self.price_ids = ids.into();
        self.vs_currencies = vs.into();
        self
    }

    // ------------------------------------------------------------------
    // Domain operations
    // ------------------------------------------------------------------

    /// The latest market snapshot (price plus gas tracker).
    pub async fn get_market_data(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::MarketData).arg("latest");
        self.read_through(&key, ctx, || async {
            let price = self
                .gateway
                .fetch_price(&self.price_ids, &self.vs_currencies, ctx)
                .await?;
            let gas = self.gateway.fetch_gas_tracker(ctx).await?;
            let degraded = price.degraded || gas.degraded;
            let stale = price.stale || gas.stale;
            let snapshot = json!({
                "price": price.payload,
                "gas_tracker": gas.payload,
                "degraded": degraded,
                "updated_at_ms": now_ms(),
            });
            if !degraded {
                if let Err(err) = self
                    .cache
                    .set(&key, &snapshot, Duration::from_secs(300), Duration::from_secs(600))
                    .await
                {
                    tracing::warn!(error = %err, "market snapshot cache write dropped");
                }
            }
            Ok(Fetched {
                payload: snapshot,
                stale,
                degraded,
            })
        })
        .await
    }

    /// Relationship graph around `address` up to `depth` hops.
    pub async fn get_wallet_network(
        &self,
        address: &str,
        depth: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::WalletNetwork)
            .arg(address)
            .arg(depth);
        self.read_through(&key, ctx, || {
            self.gateway.fetch_wallet_network(address, depth, ctx)
        })
        .await
    }

    /// Paged wallet rankings.
    pub async fn get_wallet_rankings(
        &self,
        page: u32,
        page_size: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::WalletRankings)
            .arg(page)
            .arg(page_size);
        self.read_through(&key, ctx, || {
            self.gateway.fetch_wallet_rankings(page, page_size, ctx)
        })
        .await
    }

    /// Aggregated dashboard statistics.
    pub async fn get_dashboard_stats(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::DashboardStats);
        self.read_through(&key, ctx, || self.gateway.fetch_dashboard_stats(ctx))
            .await
    }

    /// Risk score for `address`.
    pub async fn get_risk_score(
        &self,
        address: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::RiskScore).arg(address);
        self.read_through(&key, ctx, || self.gateway.fetch_risk_score(address, ctx))
            .await
    }

    /// Per-chain network statistics.
    pub async fn get_network_stats(
        &self,
        chain: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::NetworkStats).arg(chain);
        self.read_through(&key, ctx, || self.gateway.fetch_network_stats(chain, ctx))
            .await
    }

    /// The raw transaction document for `tx_hash`.
    pub async fn get_transaction_data(
        &self,
        tx_hash: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::TransactionData).arg(tx_hash);
        self.read_through(&key, ctx, || {
            self.gateway.fetch_transaction_data(tx_hash, ctx)
        })
        .await
    }

    /// The precomputed popular-wallets listing.
    pub async fn get_popular_wallets(
        &self,
        limit: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, FacadeError> {
        let key = CacheKey::new(CacheDomain::PopularWallets);
        self.read_through(&key, ctx, || self.gateway.fetch_popular_wallets(limit, ctx))
            .await
    }

    /// Explicitly drops cache entries; the next read refetches.
    pub async fn invalidate(&self, keys: &[&CacheKey]) -> Result<u64, FacadeError> {
        self.cache
            .delete(keys)
            .await
            .map_err(|err| FacadeError::new(ErrorKind::CacheUnavailable, err.to_string()))
    }

    // ------------------------------------------------------------------
    // The cache-or-fetch protocol
    // ------------------------------------------------------------------

    async fn read_through<F, Fut>(
        &self,
        key: &CacheKey,
        ctx: &CancellationToken,
        op: F,
    ) -> Result<Fetched<Value>, FacadeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched<Value>, UpstreamError>>,
    {
        match self.cache.get::<Value>(key, false).await {
            Ok(Some(hit)) => return Ok(Fetched::fresh(hit.payload)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "cache read failed; treating as miss")
            }
        }

        // A store failure here must not block the read: proceed as winner.
        let won = self
            .cache
            .acquire_single_flight(key, self.lease)
            .await
            .unwrap_or(true);

        if !won {
            if let Some(hit) = self.poll_for_fresh(key, ctx).await? {
                return Ok(Fetched::fresh(hit.payload));
            }
            tracing::debug!(key = %key, "single-flight wait elapsed; proceeding as winner");
        }

        let result = op().await.map_err(FacadeError::from_upstream);
        if let Err(err) = self.cache.release_single_flight(key).await {
            tracing::warn!(key = %key, error = %err, "single-flight release dropped");
        }
        result
    }

    async fn poll_for_fresh(
        &self,
        key: &CacheKey,
        ctx: &CancellationToken,
    ) -> Result<Option<CacheHit<Value>>, FacadeError> {
        let deadline = tokio::time::Instant::now() + self.poll_max_wait;
        while tokio::time::Instant::now() < deadline {
            let jitter_ms = { rand::rng().random_range(25..=100u64) };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(jitter_ms)) => {}
                _ = ctx.cancelled() => return Err(FacadeError::cancelled()),
            }
            match self.cache.get::<Value>(key, false).await {
                Ok(Some(hit)) => return Ok(Some(hit)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "cache poll failed");
                }
            }
        }
        Ok(None)
    }
}
