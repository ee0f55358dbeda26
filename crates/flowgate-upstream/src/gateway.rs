//! The gateway: every expensive read follows one uniform protocol.

use crate::{FallbackTable, Sources, UpstreamError};
use flowgate_cache::{CacheDomain, CacheKey, CacheStore, TtlPolicy};
use flowgate_core::{EngineEvent, EventListeners, FnListener};
use flowgate_ratelimit::{RateLimitError, RateLimiter, CHAIN_EXPLORER, PRICE_FEED};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Default fresh TTL for price lookups.
pub const PRICE_FRESH_TTL: Duration = Duration::from_secs(300);
/// Default fresh TTL for gas-tracker lookups.
pub const GAS_TRACKER_FRESH_TTL: Duration = Duration::from_secs(180);
/// Default fresh TTL for wallet network graphs.
pub const WALLET_NETWORK_FRESH_TTL: Duration = Duration::from_secs(300);
/// Default fresh TTL for wallet rankings.
pub const WALLET_RANKINGS_FRESH_TTL: Duration = Duration::from_secs(600);
/// Default fresh TTL for dashboard statistics.
pub const DASHBOARD_STATS_FRESH_TTL: Duration = Duration::from_secs(180);
/// Default fresh TTL for risk scores.
pub const RISK_SCORE_FRESH_TTL: Duration = Duration::from_secs(900);
/// Default fresh TTL for network statistics.
pub const NETWORK_STATS_FRESH_TTL: Duration = Duration::from_secs(600);
/// Default fresh TTL for transaction documents.
pub const TRANSACTION_DATA_FRESH_TTL: Duration = Duration::from_secs(300);
/// Default fresh TTL for the popular-wallets listing.
pub const POPULAR_WALLETS_FRESH_TTL: Duration = Duration::from_secs(21_600);

/// A gateway result: the payload plus how it was obtained.
///
/// `stale` and `degraded` travel with the payload all the way to the request
/// layer so it can surface degradation to the end user.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    /// The payload.
    pub payload: T,
    /// Entry was past its fresh TTL and served because the upstream failed.
    pub stale: bool,
    /// Payload came from a stale entry or a fallback constant.
    pub degraded: bool,
}

impl<T> Fetched<T> {
    /// A fresh (cached or just-fetched) payload.
    pub fn fresh(payload: T) -> Self {
        Self {
            payload,
            stale: false,
            degraded: false,
        }
    }

    /// A stale entry served on upstream failure.
    pub fn stale(payload: T) -> Self {
        Self {
            payload,
            stale: true,
            degraded: true,
        }
    }

    /// A fallback constant served on upstream failure.
    pub fn fallback(payload: T) -> Self {
        Self {
            payload,
            stale: false,
            degraded: true,
        }
    }
}

/// Events emitted by the gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A retryable failure triggered a backoff.
    Retry {
        /// Operation name.
        operation: &'static str,
        /// 1-indexed attempt that failed.
        attempt: u32,
        /// Backoff delay before the next attempt.
        delay: Duration,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// Retries exhausted; a stale entry was served.
    StaleServed {
        /// Operation name.
        operation: &'static str,
        /// Age of the stale entry.
        age: Duration,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// Retries exhausted with no stale entry; the fallback constant was
    /// served.
    FallbackServed {
        /// Operation name.
        operation: &'static str,
        /// When the event occurred.
        timestamp: Instant,
    },
}

impl EngineEvent for GatewayEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GatewayEvent::Retry { .. } => "retry",
            GatewayEvent::StaleServed { .. } => "stale_served",
            GatewayEvent::FallbackServed { .. } => "fallback_served",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            GatewayEvent::Retry { timestamp, .. }
            | GatewayEvent::StaleServed { timestamp, .. }
            | GatewayEvent::FallbackServed { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        "api_gateway"
    }
}

/// Retry and degradation policy for upstream calls.
pub struct FetchPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_cap: Duration,
    pub(crate) call_timeout: Duration,
    pub(crate) rate_penalty: Duration,
    pub(crate) max_payload_bytes: usize,
    pub(crate) listeners: EventListeners<GatewayEvent>,
}

impl FetchPolicy {
    /// Creates a builder with the default policy: 3 attempts, exponential
    /// backoff of base 1 s capped at 8 s, 10 s call timeout, 1 s penalty
    /// after a 429, 1 MiB payload cap.
    pub fn builder() -> FetchPolicyBuilder {
        FetchPolicyBuilder::new()
    }

    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_cap)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`FetchPolicy`].
pub struct FetchPolicyBuilder {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    call_timeout: Duration,
    rate_penalty: Duration,
    max_payload_bytes: usize,
    listeners: EventListeners<GatewayEvent>,
}

impl FetchPolicyBuilder {
    fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(8),
            call_timeout: Duration::from_secs(10),
            rate_penalty: Duration::from_secs(1),
            max_payload_bytes: 1024 * 1024,
            listeners: EventListeners::new(),
        }
    }

    /// Total attempts, including the first.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Exponential backoff parameters.
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Per-call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Penalty window applied to the rate bucket after a 429.
    pub fn rate_penalty(mut self, penalty: Duration) -> Self {
        self.rate_penalty = penalty;
        self
    }

    /// Payload size cap; larger responses are rejected and never cached.
    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Registers a callback for each retry (attempt number, delay).
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let GatewayEvent::Retry { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Registers a callback for each degraded response (operation name).
    pub fn on_degraded<F>(mut self, f: F) -> Self
    where
        F: Fn(&'static str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            match event {
                GatewayEvent::StaleServed { operation, .. }
                | GatewayEvent::FallbackServed { operation, .. } => f(operation),
                GatewayEvent::Retry { .. } => {}
            }
        }));
        self
    }

    /// Builds the policy.
    pub fn build(self) -> FetchPolicy {
        FetchPolicy {
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            backoff_cap: self.backoff_cap,
            call_timeout: self.call_timeout,
            rate_penalty: self.rate_penalty,
            max_payload_bytes: self.max_payload_bytes,
            listeners: self.listeners,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Serve a fresh cache entry when present.
    ReadThrough,
    /// Skip the fresh check and repopulate unconditionally (crawlers).
    Refresh,
}

/// The external API gateway.
///
/// One read method per upstream operation, each following the same protocol:
/// fresh-cache check, rate-limited timed call, cache write on success,
/// exponential backoff on retryable failures, then stale-serve or a
/// deterministic fallback constant.
pub struct ApiGateway {
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    sources: Sources,
    policy: FetchPolicy,
    ttls: TtlPolicy,
    fallbacks: FallbackTable,
}

impl ApiGateway {
    /// Creates a gateway with the default policy, TTLs and fallbacks.
    pub fn new(cache: Arc<CacheStore>, limiter: Arc<RateLimiter>, sources: Sources) -> Self {
        Self {
            cache,
            limiter,
            sources,
            policy: FetchPolicy::default(),
            ttls: TtlPolicy::new(),
            fallbacks: FallbackTable::default(),
        }
    }

    /// Replaces the fetch policy.
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the TTL override table.
    pub fn with_ttls(mut self, ttls: TtlPolicy) -> Self {
        self.ttls = ttls;
        self
    }

    /// Replaces the fallback constants.
    pub fn with_fallbacks(mut self, fallbacks: FallbackTable) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// The cache this gateway writes through.
    pub fn cache(&self) -> Arc<CacheStore> {
        Arc::clone(&self.cache)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Current prices for `ids` quoted in `vs_currencies`.
    pub async fn fetch_price(
        &self,
        ids: &str,
        vs_currencies: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.price_op(ids, vs_currencies, FetchMode::ReadThrough, ctx)
            .await
    }

    /// [`Self::fetch_price`] bypassing the fresh-cache check.
    pub async fn refresh_price(
        &self,
        ids: &str,
        vs_currencies: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.price_op(ids, vs_currencies, FetchMode::Refresh, ctx)
            .await
    }

    async fn price_op(
        &self,
        ids: &str,
        vs_currencies: &str,
        mode: FetchMode,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::MarketData)
            .arg("price")
            .arg(ids)
            .arg(vs_currencies);
        self.fetch_cached(
            "price",
            &key,
            Some(PRICE_FEED),
            PRICE_FRESH_TTL,
            Some(self.fallbacks.price()),
            mode,
            ctx,
            || self.sources.price.simple_price(ids, vs_currencies),
        )
        .await
    }

    /// Current gas oracle readings.
    pub async fn fetch_gas_tracker(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.gas_op(FetchMode::ReadThrough, ctx).await
    }

    /// [`Self::fetch_gas_tracker`] bypassing the fresh-cache check.
    pub async fn refresh_gas_tracker(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.gas_op(FetchMode::Refresh, ctx).await
    }

    async fn gas_op(
        &self,
        mode: FetchMode,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::MarketData).arg("gas_tracker");
        self.fetch_cached(
            "gas_tracker",
            &key,
            Some(CHAIN_EXPLORER),
            GAS_TRACKER_FRESH_TTL,
            Some(self.fallbacks.gas_tracker()),
            mode,
            ctx,
            || self.sources.explorer.gas_oracle(),
        )
        .await
    }

    /// Relationship graph around `address` up to `depth` hops.
    pub async fn fetch_wallet_network(
        &self,
        address: &str,
        depth: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.wallet_network_op(address, depth, FetchMode::ReadThrough, ctx)
            .await
    }

    /// [`Self::fetch_wallet_network`] bypassing the fresh-cache check.
    pub async fn refresh_wallet_network(
        &self,
        address: &str,
        depth: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.wallet_network_op(address, depth, FetchMode::Refresh, ctx)
            .await
    }

    async fn wallet_network_op(
        &self,
        address: &str,
        depth: u32,
        mode: FetchMode,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::WalletNetwork)
            .arg(address)
            .arg(depth);
        self.fetch_cached(
            "wallet_network",
            &key,
            None,
            WALLET_NETWORK_FRESH_TTL,
            None,
            mode,
            ctx,
            || self.sources.graph.wallet_network(address, depth),
        )
        .await
    }

    /// Paged wallet rankings.
    pub async fn fetch_wallet_rankings(
        &self,
        page: u32,
        page_size: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::WalletRankings)
            .arg(page)
            .arg(page_size);
        self.fetch_cached(
            "wallet_rankings",
            &key,
            None,
            WALLET_RANKINGS_FRESH_TTL,
            None,
            FetchMode::ReadThrough,
            ctx,
            || self.sources.graph.wallet_rankings(page, page_size),
        )
        .await
    }

    /// Aggregated dashboard statistics.
    pub async fn fetch_dashboard_stats(
        &self,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::DashboardStats);
        self.fetch_cached(
            "dashboard_stats",
            &key,
            None,
            DASHBOARD_STATS_FRESH_TTL,
            None,
            FetchMode::ReadThrough,
            ctx,
            || self.sources.graph.dashboard_stats(),
        )
        .await
    }

    /// Risk score for `address`.
    pub async fn fetch_risk_score(
        &self,
        address: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.risk_score_op(address, FetchMode::ReadThrough, ctx).await
    }

    /// [`Self::fetch_risk_score`] bypassing the fresh-cache check.
    pub async fn refresh_risk_score(
        &self,
        address: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.risk_score_op(address, FetchMode::Refresh, ctx).await
    }

    async fn risk_score_op(
        &self,
        address: &str,
        mode: FetchMode,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::RiskScore).arg(address);
        self.fetch_cached(
            "risk_score",
            &key,
            None,
            RISK_SCORE_FRESH_TTL,
            None,
            mode,
            ctx,
            || self.sources.graph.risk_score(address),
        )
        .await
    }

    /// Per-chain network statistics (block height plus node health).
    pub async fn fetch_network_stats(
        &self,
        chain: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.network_stats_op(chain, FetchMode::ReadThrough, ctx).await
    }

    /// [`Self::fetch_network_stats`] bypassing the fresh-cache check.
    pub async fn refresh_network_stats(
        &self,
        chain: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.network_stats_op(chain, FetchMode::Refresh, ctx).await
    }

    async fn network_stats_op(
        &self,
        chain: &str,
        mode: FetchMode,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::NetworkStats).arg(chain);
        self.fetch_cached(
            "network_stats",
            &key,
            None,
            NETWORK_STATS_FRESH_TTL,
            None,
            mode,
            ctx,
            || async {
                let block_number = self.sources.node.block_number().await?;
                let health = self.sources.node.chain_health().await?;
                Ok(json!({
                    "chain": chain,
                    "block_number": block_number,
                    "health": health,
                }))
            },
        )
        .await
    }

    /// The raw transaction document for `tx_hash`.
    pub async fn fetch_transaction_data(
        &self,
        tx_hash: &str,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::TransactionData).arg(tx_hash);
        self.fetch_cached(
            "transaction_data",
            &key,
            None,
            TRANSACTION_DATA_FRESH_TTL,
            None,
            FetchMode::ReadThrough,
            ctx,
            || self.sources.documents.transaction_data(tx_hash),
        )
        .await
    }

    /// Top wallets by recent activity.
    pub async fn fetch_popular_wallets(
        &self,
        limit: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.popular_wallets_op(limit, FetchMode::ReadThrough, ctx)
            .await
    }

    /// [`Self::fetch_popular_wallets`] bypassing the fresh-cache check.
    pub async fn refresh_popular_wallets(
        &self,
        limit: u32,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        self.popular_wallets_op(limit, FetchMode::Refresh, ctx).await
    }

    async fn popular_wallets_op(
        &self,
        limit: u32,
        mode: FetchMode,
        ctx: &CancellationToken,
    ) -> Result<Fetched<Value>, UpstreamError> {
        let key = CacheKey::new(CacheDomain::PopularWallets);
        self.fetch_cached(
            "popular_wallets",
            &key,
            None,
            POPULAR_WALLETS_FRESH_TTL,
            None,
            mode,
            ctx,
            || self.sources.graph.top_wallets(limit),
        )
        .await
    }

    // ------------------------------------------------------------------
    // The uniform protocol
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn fetch_cached<F, Fut>(
        &self,
        operation: &'static str,
        key: &CacheKey,
        bucket: Option<&'static str>,
        fresh_default: Duration,
        fallback: Option<Value>,
        mode: FetchMode,
        ctx: &CancellationToken,
        fetch: F,
    ) -> Result<Fetched<Value>, UpstreamError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, UpstreamError>>,
    {
        let fresh_ttl = self.ttls.fresh_ttl(key.domain(), fresh_default);
        let hard_ttl = fresh_ttl * 2;

        if mode == FetchMode::ReadThrough {
            match self.cache.get::<Value>(key, false).await {
                Ok(Some(hit)) => return Ok(Fetched::fresh(hit.payload)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "cache read failed; treating as miss")
                }
            }
        }

        let mut last_error = UpstreamError::Transient("no attempt made".to_string());
        for attempt in 1..=self.policy.max_attempts {
            if let Some(name) = bucket {
                match self.limiter.acquire(name, ctx).await {
                    Ok(()) => {}
                    Err(RateLimitError::Cancelled) => return Err(UpstreamError::Cancelled),
                    Err(err @ RateLimitError::UnknownUpstream { .. }) => {
                        tracing::warn!(operation, error = %err, "proceeding without rate bucket")
                    }
                }
            }

            let outcome = tokio::select! {
                result = fetch() => result,
                _ = tokio::time::sleep(self.policy.call_timeout) => {
                    Err(UpstreamError::Timeout(self.policy.call_timeout))
                }
                _ = ctx.cancelled() => Err(UpstreamError::Cancelled),
            };

            match outcome {
                Ok(payload) => {
                    let size = serde_json::to_string(&payload)
                        .map(|raw| raw.len())
                        .unwrap_or(0);
                    if size > self.policy.max_payload_bytes {
                        return Err(UpstreamError::PayloadTooLarge {
                            size,
                            limit: self.policy.max_payload_bytes,
                        });
                    }
                    if let Err(err) = self.cache.set(key, &payload, fresh_ttl, hard_ttl).await {
                        tracing::warn!(key = %key, error = %err, "cache write dropped");
                    }
                    return Ok(Fetched::fresh(payload));
                }
                Err(UpstreamError::Cancelled) => return Err(UpstreamError::Cancelled),
                Err(err) if err.is_retryable() => {
                    if matches!(err, UpstreamError::RateLimited { .. }) {
                        if let Some(name) = bucket {
                            let _ = self.limiter.penalize(name, self.policy.rate_penalty).await;
                        }
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable upstream failure"
                    );
                    #[cfg(feature = "metrics")]
                    counter!("flowgate_gateway_retries_total", "operation" => operation)
                        .increment(1);
                    self.policy.listeners.emit(&GatewayEvent::Retry {
                        operation,
                        attempt,
                        delay,
                        timestamp: Instant::now(),
                    });
                    last_error = err;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancelled() => return Err(UpstreamError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }

        match self.cache.get::<Value>(key, true).await {
            Ok(Some(hit)) => {
                tracing::warn!(
                    operation,
                    key = %key,
                    age_ms = hit.age.as_millis() as u64,
                    "retries exhausted; serving stale entry"
                );
                #[cfg(feature = "metrics")]
                counter!("flowgate_gateway_stale_served_total", "operation" => operation)
                    .increment(1);
                self.policy.listeners.emit(&GatewayEvent::StaleServed {
                    operation,
                    age: hit.age,
                    timestamp: Instant::now(),
                });
                return Ok(Fetched::stale(hit.payload));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "stale read failed after exhausted retries")
            }
        }

        if let Some(payload) = fallback {
            tracing::warn!(operation, key = %key, "retries exhausted; serving fallback constant");
            #[cfg(feature = "metrics")]
            counter!("flowgate_gateway_fallback_served_total", "operation" => operation)
                .increment(1);
            self.policy.listeners.emit(&GatewayEvent::FallbackServed {
                operation,
                timestamp: Instant::now(),
            });
            return Ok(Fetched::fallback(payload));
        }

        Err(last_error)
    }
}
