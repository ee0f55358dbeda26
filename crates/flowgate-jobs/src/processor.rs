//! The worker pool that executes claimed jobs.
//!
//! Workers pull from the queue (5 s poll or an enqueue wake-up), dispatch by
//! kind to the registered crawler, and report the outcome. A crawler error or
//! panic never takes a worker down; it is recorded on the job and the retry
//! policy takes over. On shutdown workers stop claiming immediately and the
//! in-flight job gets a drain window before the hard abort leaves it to
//! next-start recovery.

use crate::{Job, JobKind, JobPayload, JobQueue};
use flowgate_cache::CacheError;
use flowgate_core::{EngineEvent, EventListeners, FnListener, KvError};
use flowgate_upstream::UpstreamError;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A crawler failure, recorded verbatim on the job record.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CrawlError(pub String);

impl CrawlError {
    /// Creates an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<UpstreamError> for CrawlError {
    fn from(err: UpstreamError) -> Self {
        Self(err.to_string())
    }
}

impl From<CacheError> for CrawlError {
    fn from(err: CacheError) -> Self {
        Self(err.to_string())
    }
}

impl From<crate::JobError> for CrawlError {
    fn from(err: crate::JobError) -> Self {
        Self(err.to_string())
    }
}

impl From<KvError> for CrawlError {
    fn from(err: KvError) -> Self {
        Self(err.to_string())
    }
}

/// A background crawler: receives the job's typed payload and a cancellable
/// context, returns an opaque result recorded on the job.
#[async_trait::async_trait]
pub trait Crawler: Send + Sync {
    /// Executes one job. Must be idempotent (jobs are at-least-once).
    async fn run(&self, payload: &JobPayload, ctx: &CancellationToken)
        -> Result<Value, CrawlError>;
}

/// Registry mapping job kinds to crawler implementations.
#[derive(Default)]
pub struct CrawlerRegistry {
    crawlers: std::collections::HashMap<JobKind, Arc<dyn Crawler>>,
}

impl CrawlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the crawler for `kind`, replacing any previous one.
    pub fn register(mut self, kind: JobKind, crawler: Arc<dyn Crawler>) -> Self {
        self.crawlers.insert(kind, crawler);
        self
    }

    /// The crawler for `kind`, if registered.
    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Crawler>> {
        self.crawlers.get(&kind).cloned()
    }
}

/// Per-kind execution deadline.
fn job_timeout(kind: JobKind) -> Duration {
    match kind {
        JobKind::MarketDataCrawl | JobKind::NetworkStatsCrawl => Duration::from_secs(30),
        JobKind::PopularWalletsDiscovery | JobKind::WalletRefresh | JobKind::DataCleanup => {
            Duration::from_secs(60)
        }
    }
}

/// Events emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A job completed successfully.
    Completed {
        /// Job id.
        job_id: String,
        /// Job kind.
        kind: JobKind,
        /// Executions it took.
        attempts: u32,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// A job execution failed.
    Failed {
        /// Job id.
        job_id: String,
        /// Job kind.
        kind: JobKind,
        /// Failure detail.
        error: String,
        /// Whether the retry policy will run it again.
        will_retry: bool,
        /// When the event occurred.
        timestamp: Instant,
    },
}

impl EngineEvent for JobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Completed { .. } => "job_completed",
            JobEvent::Failed { .. } => "job_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            JobEvent::Completed { timestamp, .. } | JobEvent::Failed { timestamp, .. } => {
                *timestamp
            }
        }
    }

    fn component(&self) -> &str {
        "job_processor"
    }
}

/// The worker pool configuration and launcher.
pub struct ProcessorPool {
    queue: Arc<JobQueue>,
    registry: Arc<CrawlerRegistry>,
    workers: usize,
    poll_interval: Duration,
    drain_window: Duration,
    listeners: EventListeners<JobEvent>,
}

impl ProcessorPool {
    /// A pool with the defaults: one worker, 5 s poll, 25 s drain window.
    pub fn new(queue: Arc<JobQueue>, registry: CrawlerRegistry) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            workers: 1,
            poll_interval: Duration::from_secs(5),
            drain_window: Duration::from_secs(25),
            listeners: EventListeners::new(),
        }
    }

    /// Sets the worker count. All jobs are idempotent, so raising this is
    /// safe; it mostly helps when crawlers block on slow upstreams.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown drain window.
    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    /// Registers a callback for completed jobs.
    pub fn on_job_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, JobKind) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let JobEvent::Completed { job_id, kind, .. } = event {
                f(job_id, *kind);
            }
        }));
        self
    }

    /// Registers a callback for failed executions.
    pub fn on_job_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, JobKind, bool) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let JobEvent::Failed {
                job_id,
                kind,
                will_retry,
                ..
            } = event
            {
                f(job_id, *kind, *will_retry);
            }
        }));
        self
    }

    /// Spawns the workers and returns their handle.
    pub fn start(self) -> ProcessorHandle {
        let shutdown = CancellationToken::new();
        let work_ctx = CancellationToken::new();
        let drain_window = self.drain_window;
        let pool = Arc::new(self);

        let handles = (0..pool.workers)
            .map(|worker_id| {
                let pool = Arc::clone(&pool);
                let shutdown = shutdown.clone();
                let work_ctx = work_ctx.clone();
                tokio::spawn(async move {
                    pool.worker_loop(worker_id, shutdown, work_ctx).await;
                })
            })
            .collect();

        ProcessorHandle {
            shutdown,
            work_ctx,
            handles,
            drain_window,
        }
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        shutdown: CancellationToken,
        work_ctx: CancellationToken,
    ) {
        let wake = self.queue.wake_handle();
        tracing::debug!(worker_id, "worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.queue.claim_next().await {
                Ok(Some(job)) => self.process(job, &work_ctx).await,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(worker_id, error = %err, "claim failed; backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id, "worker stopped");
    }

    async fn process(&self, job: Job, work_ctx: &CancellationToken) {
        let crawler = match self.registry.get(job.kind) {
            Some(crawler) => crawler,
            None => {
                tracing::error!(job_id = %job.id, kind = %job.kind, "no crawler registered");
                self.report_failure(&job, "no crawler registered for kind".to_string())
                    .await;
                return;
            }
        };

        let deadline = job_timeout(job.kind);
        let outcome = tokio::select! {
            result = AssertUnwindSafe(crawler.run(&job.payload, work_ctx)).catch_unwind() => result,
            _ = tokio::time::sleep(deadline) => {
                Ok(Err(CrawlError::new(format!("timed out after {deadline:?}"))))
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                if let Err(err) = self.queue.complete(&job.id, result).await {
                    tracing::warn!(job_id = %job.id, error = %err, "complete() failed; job stays leased");
                    return;
                }
                self.listeners.emit(&JobEvent::Completed {
                    job_id: job.id.clone(),
                    kind: job.kind,
                    attempts: job.attempts,
                    timestamp: Instant::now(),
                });
            }
            Ok(Err(err)) => {
                self.report_failure(&job, err.to_string()).await;
            }
            Err(_panic) => {
                self.report_failure(&job, "crawler panicked".to_string())
                    .await;
            }
        }
    }

    async fn report_failure(&self, job: &Job, error: String) {
        if let Err(err) = self.queue.fail(&job.id, &error).await {
            tracing::warn!(job_id = %job.id, error = %err, "fail() failed; job stays leased");
            return;
        }
        self.listeners.emit(&JobEvent::Failed {
            job_id: job.id.clone(),
            kind: job.kind,
            error,
            will_retry: job.attempts < job.max_attempts,
            timestamp: Instant::now(),
        });
    }
}

/// Handle over the spawned workers.
pub struct ProcessorHandle {
    shutdown: CancellationToken,
    work_ctx: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    drain_window: Duration,
}

impl ProcessorHandle {
    /// Stops claiming immediately, drains in-flight jobs up to the drain
    /// window, then hard-aborts. An aborted job stays in `jobs:processing`
    /// and is requeued by next-start recovery.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + self.drain_window;
        for mut handle in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                tracing::warn!("drain window elapsed; aborting worker");
                self.work_ctx.cancel();
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobStatus, Priority};
    use flowgate_core::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCrawler {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait::async_trait]
    impl Crawler for CountingCrawler {
        async fn run(
            &self,
            _payload: &JobPayload,
            _ctx: &CancellationToken,
        ) -> Result<Value, CrawlError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(CrawlError::new(format!("scripted failure {call}")))
            } else {
                Ok(json!({"call": call}))
            }
        }
    }

    struct PanickingCrawler;

    #[async_trait::async_trait]
    impl Crawler for PanickingCrawler {
        async fn run(
            &self,
            _payload: &JobPayload,
            _ctx: &CancellationToken,
        ) -> Result<Value, CrawlError> {
            panic!("boom");
        }
    }

    struct SleepingCrawler {
        duration: Duration,
    }

    #[async_trait::async_trait]
    impl Crawler for SleepingCrawler {
        async fn run(
            &self,
            _payload: &JobPayload,
            _ctx: &CancellationToken,
        ) -> Result<Value, CrawlError> {
            tokio::time::sleep(self.duration).await;
            Ok(json!(null))
        }
    }

    fn fast_pool(queue: Arc<JobQueue>, registry: CrawlerRegistry) -> ProcessorPool {
        ProcessorPool::new(queue, registry).with_poll_interval(Duration::from_millis(20))
    }

    async fn wait_for_status(queue: &JobQueue, id: &str, status: JobStatus) -> Job {
        for _ in 0..200 {
            if let Some(job) = queue.job(id).await.unwrap() {
                if job.status() == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn worker_runs_an_enqueued_job_to_completion() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CrawlerRegistry::new().register(
            JobKind::MarketDataCrawl,
            Arc::new(CountingCrawler {
                calls: Arc::clone(&calls),
                fail_first: 0,
            }),
        );
        let handle = fast_pool(Arc::clone(&queue), registry).start();

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        let job = wait_for_status(&queue, &id, JobStatus::Completed).await;
        assert_eq!(job.attempts, 1);
        assert_eq!(job.result, Some(json!({"call": 0})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().await.unwrap().processing, 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failures_retry_until_success() {
        // Zero retry base keeps the retries immediately claimable.
        let queue = Arc::new(
            JobQueue::new(Arc::new(MemoryStore::new())).with_retry_base(Duration::ZERO),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CrawlerRegistry::new().register(
            JobKind::MarketDataCrawl,
            Arc::new(CountingCrawler {
                calls: Arc::clone(&calls),
                fail_first: 2,
            }),
        );
        let handle = fast_pool(Arc::clone(&queue), registry).start();

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        let job = wait_for_status(&queue, &id, JobStatus::Completed).await;
        assert_eq!(job.attempts, 3);
        assert!(job.completed_at.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn a_panicking_crawler_fails_the_job_but_not_the_worker() {
        let queue = Arc::new(
            JobQueue::new(Arc::new(MemoryStore::new()))
                .with_retry_base(Duration::ZERO)
                .with_default_max_attempts(1),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CrawlerRegistry::new()
            .register(JobKind::DataCleanup, Arc::new(PanickingCrawler))
            .register(
                JobKind::MarketDataCrawl,
                Arc::new(CountingCrawler {
                    calls: Arc::clone(&calls),
                    fail_first: 0,
                }),
            );
        let handle = fast_pool(Arc::clone(&queue), registry).start();

        let bad = queue
            .enqueue(JobPayload::DataCleanup {}, Priority::High, None)
            .await
            .unwrap();
        let job = wait_for_status(&queue, &bad, JobStatus::Failed).await;
        assert_eq!(job.last_error.as_deref(), Some("crawler panicked"));

        // The worker is still alive and processes the next job.
        let good = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        wait_for_status(&queue, &good, JobStatus::Completed).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn unregistered_kind_is_recorded_as_a_failure() {
        let queue = Arc::new(
            JobQueue::new(Arc::new(MemoryStore::new()))
                .with_retry_base(Duration::ZERO)
                .with_default_max_attempts(1),
        );
        let handle = fast_pool(Arc::clone(&queue), CrawlerRegistry::new()).start();

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        let job = wait_for_status(&queue, &id, JobStatus::Failed).await;
        assert_eq!(
            job.last_error.as_deref(),
            Some("no crawler registered for kind")
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_claiming_new_jobs() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let registry = CrawlerRegistry::new().register(
            JobKind::MarketDataCrawl,
            Arc::new(CountingCrawler {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_first: 0,
            }),
        );
        let handle = fast_pool(Arc::clone(&queue), registry).start();
        handle.shutdown().await;

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let job = queue.job(&id).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[tokio::test]
    async fn shutdown_drains_the_in_flight_job() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let registry = CrawlerRegistry::new().register(
            JobKind::MarketDataCrawl,
            Arc::new(SleepingCrawler {
                duration: Duration::from_millis(200),
            }),
        );
        let handle = fast_pool(Arc::clone(&queue), registry)
            .with_drain_window(Duration::from_secs(5))
            .start();

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        wait_for_status(&queue, &id, JobStatus::Processing).await;

        handle.shutdown().await;
        let job = queue.job(&id).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn hard_abort_leaves_the_job_for_recovery() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let registry = CrawlerRegistry::new().register(
            JobKind::MarketDataCrawl,
            Arc::new(SleepingCrawler {
                duration: Duration::from_secs(60),
            }),
        );
        let handle = fast_pool(Arc::clone(&queue), registry)
            .with_drain_window(Duration::from_millis(50))
            .start();

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        wait_for_status(&queue, &id, JobStatus::Processing).await;

        handle.shutdown().await;
        // Abandoned mid-flight: still leased in jobs:processing.
        assert_eq!(queue.stats().await.unwrap().processing, 1);

        // Next-start recovery with a zero lease requeues it immediately.
        assert_eq!(queue.recover(Duration::ZERO).await.unwrap(), 1);
        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn completion_events_fire() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let completed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completed);
        let registry = CrawlerRegistry::new().register(
            JobKind::MarketDataCrawl,
            Arc::new(CountingCrawler {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_first: 0,
            }),
        );
        let handle = fast_pool(Arc::clone(&queue), registry)
            .on_job_completed(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .start();

        let id = queue
            .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
            .await
            .unwrap();
        wait_for_status(&queue, &id, JobStatus::Completed).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }
}
