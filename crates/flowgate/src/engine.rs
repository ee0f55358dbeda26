//! The engine container.
//!
//! All process-wide state lives in one explicit [`Engine`] value: the shared
//! store handles, cache, rate limiter, gateway, facade, job queue, scheduler
//! and worker pool. `start` spawns the background machinery (after start-time
//! queue recovery); `shutdown` tears it down, bounded by the scheduler's 1 s
//! cancellation window and the worker drain window.

use crate::{EngineConfig, ReadFacade};
use flowgate_cache::{CacheStats, CacheStore};
use flowgate_core::{KeyValueStore, MemoryStore};
use flowgate_jobs::{
    schedule_table, CrawlDefaults, CrawlerRegistry, DataCleanupCrawler, JobError, JobKind,
    JobPayload, JobQueue, MarketDataCrawler, NetworkStatsCrawler, PopularWalletsCrawler, Priority,
    ProcessorHandle, ProcessorPool, QueueStats, ScheduleEntry, Scheduler, WalletRefreshCrawler,
    STALE_LEASE,
};
use flowgate_ratelimit::RateLimiter;
use flowgate_upstream::{ApiGateway, FallbackTable, FetchPolicy, Sources};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors from engine assembly.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No upstream sources were provided.
    #[error("upstream sources are required; pass them via EngineBuilder::sources")]
    MissingSources,

    /// A configured cron override did not parse.
    #[error(transparent)]
    Jobs(#[from] JobError),
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    job_store: Option<Arc<dyn KeyValueStore>>,
    sources: Option<Sources>,
    policy: Option<FetchPolicy>,
    fallbacks: Option<FallbackTable>,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            job_store: None,
            sources: None,
            policy: None,
            fallbacks: None,
        }
    }

    /// Uses this configuration instead of the defaults.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The shared key-value store. Defaults to an in-process
    /// [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// A separate store instance for the job queue, when isolation from the
    /// cache keyspace is wanted. Defaults to the main store.
    pub fn job_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// The upstream capability handles. Required.
    pub fn sources(mut self, sources: Sources) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Overrides the gateway fetch policy.
    pub fn policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Overrides the gateway fallback constants.
    pub fn fallbacks(mut self, fallbacks: FallbackTable) -> Self {
        self.fallbacks = Some(fallbacks);
        self
    }

    /// Assembles the engine.
    pub fn build(self) -> Result<Engine, BuildError> {
        let sources = self.sources.ok_or(BuildError::MissingSources)?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let job_store = self.job_store.unwrap_or_else(|| Arc::clone(&store));
        let config = self.config;

        let cache = Arc::new(CacheStore::new(Arc::clone(&store)));
        let limiter = Arc::new(RateLimiter::with_default_buckets(
            config.price_feed_min_gap,
            config.chain_explorer_min_gap,
        ));

        let mut gateway =
            ApiGateway::new(Arc::clone(&cache), Arc::clone(&limiter), sources)
                .with_ttls(config.ttl_policy());
        if let Some(policy) = self.policy {
            gateway = gateway.with_policy(policy);
        }
        if let Some(fallbacks) = self.fallbacks {
            gateway = gateway.with_fallbacks(fallbacks);
        }
        let gateway = Arc::new(gateway);

        let facade = Arc::new(ReadFacade::new(Arc::clone(&cache), Arc::clone(&gateway)));
        let queue = Arc::new(
            JobQueue::new(job_store)
                .with_retry_base(config.job_retry_delay)
                .with_default_max_attempts(config.job_max_retries),
        );
        let entries = schedule_table(&config.job_intervals)?;
        let defaults = CrawlDefaults {
            wallet_batch_size: config.wallet_batch_size,
            high_priority_wallets: config.high_priority_wallets.clone(),
            ..CrawlDefaults::default()
        };

        Ok(Engine {
            config,
            cache,
            gateway,
            facade,
            queue,
            entries,
            defaults,
            root: CancellationToken::new(),
            running: Mutex::new(None),
        })
    }
}

struct Running {
    scheduler: JoinHandle<()>,
    processor: ProcessorHandle,
}

/// Combined statistics snapshot, the observability surface for background
/// work.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    /// Queue structure sizes.
    pub queue: QueueStats,
    /// Cache read counters.
    pub cache: CacheStats,
}

/// The assembled engine.
pub struct Engine {
    config: EngineConfig,
    cache: Arc<CacheStore>,
    gateway: Arc<ApiGateway>,
    facade: Arc<ReadFacade>,
    queue: Arc<JobQueue>,
    entries: Vec<ScheduleEntry>,
    defaults: CrawlDefaults,
    root: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl Engine {
    /// Starts building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The read-through facade for the request layer.
    pub fn facade(&self) -> Arc<ReadFacade> {
        Arc::clone(&self.facade)
    }

    /// The upstream gateway.
    pub fn gateway(&self) -> Arc<ApiGateway> {
        Arc::clone(&self.gateway)
    }

    /// The cache store.
    pub fn cache(&self) -> Arc<CacheStore> {
        Arc::clone(&self.cache)
    }

    /// The job queue.
    pub fn queue(&self) -> Arc<JobQueue> {
        Arc::clone(&self.queue)
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs start-time recovery and spawns the scheduler and worker pool
    /// (unless jobs are disabled). Idempotent: a second call is a no-op.
    pub async fn start(&self) -> Result<(), JobError> {
        if self.running.lock().is_some() {
            tracing::warn!("engine already started");
            return Ok(());
        }

        let requeued = self.queue.recover(STALE_LEASE).await?;
        if requeued > 0 {
            tracing::info!(requeued, "recovered abandoned claims on start");
        }

        if !self.config.jobs_enabled {
            tracing::info!("background jobs disabled; serving reads only");
            return Ok(());
        }

        let scheduler = Scheduler::new(
            Arc::clone(&self.queue),
            self.entries.clone(),
            self.defaults.clone(),
        );
        let scheduler = tokio::spawn(scheduler.run(self.root.child_token()));

        let registry = CrawlerRegistry::new()
            .register(
                JobKind::MarketDataCrawl,
                Arc::new(MarketDataCrawler::new(Arc::clone(&self.gateway))),
            )
            .register(
                JobKind::NetworkStatsCrawl,
                Arc::new(NetworkStatsCrawler::new(Arc::clone(&self.gateway))),
            )
            .register(
                JobKind::PopularWalletsDiscovery,
                Arc::new(PopularWalletsCrawler::new(Arc::clone(&self.gateway))),
            )
            .register(
                JobKind::WalletRefresh,
                Arc::new(
                    WalletRefreshCrawler::new(Arc::clone(&self.gateway))
                        .with_batch_size(self.config.wallet_batch_size),
                ),
            )
            .register(
                JobKind::DataCleanup,
                Arc::new(DataCleanupCrawler::new(Arc::clone(&self.queue))),
            );
        let processor = ProcessorPool::new(Arc::clone(&self.queue), registry)
            .with_workers(self.config.workers)
            .start();

        *self.running.lock() = Some(Running {
            scheduler,
            processor,
        });
        tracing::info!(workers = self.config.workers, "engine started");
        Ok(())
    }

    /// Stops the scheduler (within its 1 s bound) and drains the workers.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let running = { self.running.lock().take() };
        if let Some(running) = running {
            if tokio::time::timeout(Duration::from_secs(2), running.scheduler)
                .await
                .is_err()
            {
                tracing::warn!("scheduler did not stop within its bound");
            }
            running.processor.shutdown().await;
        }
        tracing::info!("engine stopped");
    }

    /// Ad-hoc API-triggered enqueue, at medium priority. Returns the job id.
    pub async fn trigger_job(&self, payload: JobPayload) -> Result<String, JobError> {
        let id = self.queue.enqueue(payload, Priority::Medium, None).await?;
        tracing::info!(job_id = %id, "job triggered");
        Ok(id)
    }

    /// Statistics snapshot: queue depths plus cache counters.
    pub async fn stats(&self) -> Result<EngineStats, JobError> {
        Ok(EngineStats {
            queue: self.queue.stats().await?,
            cache: self.cache.stats(),
        })
    }
}
