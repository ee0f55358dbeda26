//! The registered crawler implementations.
//!
//! Each crawler repopulates cache entries through the gateway's refresh
//! paths (which bypass the fresh-cache check but keep rate limiting, retry
//! and the degradation ladder), so a background cycle and a live fetch write
//! identical entries.

use crate::{CrawlError, Crawler, JobKind, JobPayload, JobQueue};
use async_trait::async_trait;
use flowgate_cache::{CacheDomain, CacheKey};
use flowgate_core::{now_ms, KvError};
use flowgate_upstream::ApiGateway;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn payload_mismatch(expected: JobKind, payload: &JobPayload) -> CrawlError {
    CrawlError::new(format!(
        "expected {expected} payload, got {}",
        payload.kind()
    ))
}

/// `market_data_crawl`: refreshes price and gas tracker, then writes the
/// combined `market_data:latest` snapshot (fresh 300 s).
pub struct MarketDataCrawler {
    gateway: Arc<ApiGateway>,
    price_ids: String,
    vs_currencies: String,
}

impl MarketDataCrawler {
    /// Crawler refreshing the default `ethereum`/`usd` pair.
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self {
            gateway,
            price_ids: "ethereum".to_string(),
            vs_currencies: "usd".to_string(),
        }
    }

    /// Overrides the refreshed pair.
    pub fn with_pair(mut self, ids: impl Into<String>, vs: impl Into<String>) -> Self {
        self.price_ids = ids.into();
        self.vs_currencies = vs.into();
        self
    }
}

#[async_trait]
impl Crawler for MarketDataCrawler {
    async fn run(
        &self,
        payload: &JobPayload,
        ctx: &CancellationToken,
    ) -> Result<Value, CrawlError> {
        if !matches!(payload, JobPayload::MarketDataCrawl {}) {
            return Err(payload_mismatch(JobKind::MarketDataCrawl, payload));
        }
        let price = self
            .gateway
            .refresh_price(&self.price_ids, &self.vs_currencies, ctx)
            .await?;
        let gas = self.gateway.refresh_gas_tracker(ctx).await?;
        let degraded = price.degraded || gas.degraded;

        let snapshot = json!({
            "price": price.payload,
            "gas_tracker": gas.payload,
            "degraded": degraded,
            "updated_at_ms": now_ms(),
        });
        let key = CacheKey::new(CacheDomain::MarketData).arg("latest");
        self.gateway
            .cache()
            .set(
                &key,
                &snapshot,
                Duration::from_secs(300),
                Duration::from_secs(600),
            )
            .await?;
        Ok(json!({ "degraded": degraded }))
    }
}

/// `network_stats_crawl`: refreshes `network_stats:<chain>` (fresh 600 s).
pub struct NetworkStatsCrawler {
    gateway: Arc<ApiGateway>,
}

impl NetworkStatsCrawler {
    /// Crawler over the given gateway.
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Crawler for NetworkStatsCrawler {
    async fn run(
        &self,
        payload: &JobPayload,
        ctx: &CancellationToken,
    ) -> Result<Value, CrawlError> {
        let chain = match payload {
            JobPayload::NetworkStatsCrawl { chain } => chain,
            other => return Err(payload_mismatch(JobKind::NetworkStatsCrawl, other)),
        };
        let stats = self.gateway.refresh_network_stats(chain, ctx).await?;
        Ok(json!({ "chain": chain, "degraded": stats.degraded }))
    }
}

/// `popular_wallets_discovery`: refreshes the `popular_wallets` listing
/// (fresh 6 h).
pub struct PopularWalletsCrawler {
    gateway: Arc<ApiGateway>,
}

impl PopularWalletsCrawler {
    /// Crawler over the given gateway.
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Crawler for PopularWalletsCrawler {
    async fn run(
        &self,
        payload: &JobPayload,
        ctx: &CancellationToken,
    ) -> Result<Value, CrawlError> {
        let limit = match payload {
            JobPayload::PopularWalletsDiscovery { limit } => *limit,
            other => return Err(payload_mismatch(JobKind::PopularWalletsDiscovery, other)),
        };
        let listing = self.gateway.refresh_popular_wallets(limit, ctx).await?;
        Ok(json!({ "limit": limit, "degraded": listing.degraded }))
    }
}

/// `wallet_refresh`: refreshes `wallet_network:<addr>:*` and
/// `risk_score:<addr>` for each address in the batch.
pub struct WalletRefreshCrawler {
    gateway: Arc<ApiGateway>,
    depths: Vec<u32>,
    batch_size: usize,
}

impl WalletRefreshCrawler {
    /// Crawler refreshing depths 1 and 2 with the default batch cap of 20.
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self {
            gateway,
            depths: vec![1, 2],
            batch_size: 20,
        }
    }

    /// Overrides the address batch cap.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl Crawler for WalletRefreshCrawler {
    async fn run(
        &self,
        payload: &JobPayload,
        ctx: &CancellationToken,
    ) -> Result<Value, CrawlError> {
        let addresses = match payload {
            JobPayload::WalletRefresh { addresses } => addresses,
            other => return Err(payload_mismatch(JobKind::WalletRefresh, other)),
        };

        let mut refreshed = 0usize;
        let mut failures: Vec<String> = Vec::new();
        for address in addresses.iter().take(self.batch_size) {
            if ctx.is_cancelled() {
                return Err(CrawlError::new("wallet refresh cancelled"));
            }
            let mut ok = true;
            for depth in &self.depths {
                if let Err(err) = self
                    .gateway
                    .refresh_wallet_network(address, *depth, ctx)
                    .await
                {
                    ok = false;
                    failures.push(format!("{address} network@{depth}: {err}"));
                }
            }
            if let Err(err) = self.gateway.refresh_risk_score(address, ctx).await {
                ok = false;
                failures.push(format!("{address} risk: {err}"));
            }
            if ok {
                refreshed += 1;
            }
        }

        if refreshed == 0 && !addresses.is_empty() {
            return Err(CrawlError::new(format!(
                "all {} addresses failed: {}",
                addresses.len().min(self.batch_size),
                failures.join("; ")
            )));
        }
        Ok(json!({ "refreshed": refreshed, "failed": failures.len() }))
    }
}

/// `data_cleanup`: purges terminal jobs past retention and trims old entries
/// out of `history:*` ordered sets.
pub struct DataCleanupCrawler {
    queue: Arc<JobQueue>,
    job_retention: Duration,
    history_retention: Duration,
}

impl DataCleanupCrawler {
    /// Cleanup with the default retentions: jobs 24 h, history 30 d.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            job_retention: Duration::from_secs(24 * 60 * 60),
            history_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Overrides the retention windows.
    pub fn with_retention(mut self, jobs: Duration, history: Duration) -> Self {
        self.job_retention = jobs;
        self.history_retention = history;
        self
    }
}

#[async_trait]
impl Crawler for DataCleanupCrawler {
    async fn run(
        &self,
        payload: &JobPayload,
        _ctx: &CancellationToken,
    ) -> Result<Value, CrawlError> {
        if !matches!(payload, JobPayload::DataCleanup {}) {
            return Err(payload_mismatch(JobKind::DataCleanup, payload));
        }
        let purged = self.queue.purge_terminal(self.job_retention).await?;

        let store = self.queue.backend();
        let cutoff = now_ms().saturating_sub(self.history_retention.as_millis() as u64) as f64;
        let mut trimmed = 0usize;
        for key in store.keys("history:*").await? {
            let members = match store.zrange_by_score(&key, f64::MIN, cutoff).await {
                Ok(members) => members,
                Err(KvError::WrongType { .. }) => {
                    tracing::warn!(key = %key, "skipping non-ordered-set history key");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            for member in members {
                store.zrem(&key, &member).await?;
                trimmed += 1;
            }
        }
        tracing::info!(purged, trimmed, "cleanup finished");
        Ok(json!({ "purged_jobs": purged, "trimmed_history": trimmed }))
    }
}
