//! Background jobs for the flowgate engine: a priority + scheduled queue
//! over the shared store, a cron-driven scheduler, and the worker pool that
//! dispatches claimed jobs to crawlers.
//!
//! The contract is at-least-once with idempotent crawlers: enqueue and claim
//! are not atomic across the store, abandoned claims are recovered on start,
//! and a job may run again after a crash. Within one priority claims are
//! FIFO; across priorities higher queues drain fully first.
//!
//! # Examples
//!
//! ```
//! use flowgate_core::MemoryStore;
//! use flowgate_jobs::{JobQueue, JobPayload, Priority};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), flowgate_jobs::JobError> {
//! let queue = JobQueue::new(Arc::new(MemoryStore::new()));
//! let id = queue
//!     .enqueue(JobPayload::MarketDataCrawl {}, Priority::High, None)
//!     .await?;
//!
//! let job = queue.claim_next().await?.expect("claimable");
//! assert_eq!(job.id, id);
//! queue.complete(&id, serde_json::json!({"ok": true})).await?;
//! # Ok(())
//! # }
//! ```

mod crawlers;
mod error;
mod job;
mod processor;
mod queue;
mod scheduler;

pub use crawlers::{
    DataCleanupCrawler, MarketDataCrawler, NetworkStatsCrawler, PopularWalletsCrawler,
    WalletRefreshCrawler,
};
pub use error::JobError;
pub use job::{Job, JobKind, JobPayload, JobStatus, Priority};
pub use processor::{
    CrawlError, Crawler, CrawlerRegistry, JobEvent, ProcessorHandle, ProcessorPool,
};
pub use queue::{JobQueue, QueueStats, JOB_RETENTION, STALE_LEASE};
pub use scheduler::{schedule_table, CronSpec, CrawlDefaults, ScheduleEntry, Scheduler};
