//! The priority + scheduled job queue over the shared store.
//!
//! Storage layout:
//! - `job:<id>`: the serialized [`Job`] record, expiring 24 h after write
//! - `jobs:queue:<priority>`: a list per priority; producers push at the
//!   head, workers pop from the tail (FIFO within a priority)
//! - `jobs:scheduled`: an ordered set keyed by due time (epoch ms)
//! - `jobs:processing`: the set of claimed ids; membership is the lease
//!
//! Enqueue and claim are multi-step and deliberately not atomic; recovery on
//! start and the dangling-reference handling below cover the gaps. Jobs are
//! at-least-once: crawlers must be idempotent.

use crate::{Job, JobError, JobPayload, Priority};
use flowgate_core::{now_ms, KeyValueStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

#[cfg(feature = "metrics")]
use metrics::counter;

const SCHEDULED_KEY: &str = "jobs:scheduled";
const PROCESSING_KEY: &str = "jobs:processing";

/// Claims older than this are considered abandoned and recovered on start.
pub const STALE_LEASE: Duration = Duration::from_secs(300);

/// Terminal jobs are retained this long before cleanup purges them.
pub const JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Sizes of every queue structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// `jobs:queue:critical` length.
    pub critical: u64,
    /// `jobs:queue:high` length.
    pub high: u64,
    /// `jobs:queue:medium` length.
    pub medium: u64,
    /// `jobs:queue:low` length.
    pub low: u64,
    /// Claimed jobs.
    pub processing: u64,
    /// Deferred jobs.
    pub scheduled: u64,
}

/// The job queue.
pub struct JobQueue {
    store: Arc<dyn KeyValueStore>,
    retry_base: Duration,
    job_ttl: Duration,
    default_max_attempts: u32,
    wake: Arc<Notify>,
}

impl JobQueue {
    /// Creates a queue over the shared store with the default retry base
    /// (5 s), job retention (24 h) and attempt budget (3).
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            retry_base: Duration::from_secs(5),
            job_ttl: JOB_RETENTION,
            default_max_attempts: 3,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Overrides the retry backoff base.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Overrides the default attempt budget.
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Notified whenever a job becomes claimable; workers wait on this
    /// between polls.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// The shared-store handle (cleanup walks raw keys through it).
    pub fn backend(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    fn job_key(id: &str) -> String {
        format!("job:{id}")
    }

    /// Writes a new job and makes it claimable (now, or at `scheduled_at`).
    pub async fn enqueue(
        &self,
        payload: JobPayload,
        priority: Priority,
        scheduled_at: Option<u64>,
    ) -> Result<String, JobError> {
        let now = now_ms();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            kind: payload.kind(),
            payload,
            priority,
            attempts: 0,
            max_attempts: self.default_max_attempts,
            created_at: now,
            scheduled_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
            result: None,
        };
        self.save(&job).await?;

        match scheduled_at {
            Some(due) if due > now => {
                self.store.zadd(SCHEDULED_KEY, due as f64, &job.id).await?;
                tracing::debug!(job_id = %job.id, kind = %job.kind, due, "job scheduled");
            }
            _ => {
                self.store.lpush(&priority.queue_key(), &job.id).await?;
                self.wake.notify_one();
                tracing::debug!(job_id = %job.id, kind = %job.kind, priority = %priority, "job enqueued");
            }
        }
        #[cfg(feature = "metrics")]
        counter!("flowgate_jobs_enqueued_total", "kind" => job.kind.as_str()).increment(1);
        Ok(job.id)
    }

    /// Loads a job record.
    pub async fn job(&self, id: &str) -> Result<Option<Job>, JobError> {
        match self.store.get(&Self::job_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, job: &Job) -> Result<(), JobError> {
        let raw = serde_json::to_string(job)?;
        self.store
            .set_ex(&Self::job_key(&job.id), &raw, self.job_ttl)
            .await?;
        Ok(())
    }

    /// Moves due entries from the scheduled index into their priority
    /// queues. Returns how many were promoted.
    pub async fn promote_due(&self) -> Result<usize, JobError> {
        let due = self
            .store
            .zrange_by_score(SCHEDULED_KEY, f64::MIN, now_ms() as f64)
            .await?;
        let mut promoted = 0;
        for id in due {
            self.store.zrem(SCHEDULED_KEY, &id).await?;
            match self.job(&id).await? {
                Some(job) => {
                    self.store.lpush(&job.priority.queue_key(), &id).await?;
                    promoted += 1;
                }
                None => {
                    tracing::warn!(job_id = %id, "dropping scheduled id with no job record");
                }
            }
        }
        if promoted > 0 {
            self.wake.notify_one();
        }
        Ok(promoted)
    }

    /// Claims the next job: due scheduled entries are promoted first, then
    /// priorities are scanned in strict drain order, FIFO within each.
    pub async fn claim_next(&self) -> Result<Option<Job>, JobError> {
        self.promote_due().await?;

        for priority in Priority::DRAIN_ORDER {
            let queue_key = priority.queue_key();
            loop {
                let id = match self.store.rpop(&queue_key).await? {
                    Some(id) => id,
                    None => break,
                };
                match self.job(&id).await? {
                    Some(mut job) => {
                        self.store.sadd(PROCESSING_KEY, &id).await?;
                        job.started_at = Some(now_ms());
                        job.attempts += 1;
                        self.save(&job).await?;
                        tracing::debug!(
                            job_id = %job.id,
                            kind = %job.kind,
                            attempt = job.attempts,
                            "job claimed"
                        );
                        return Ok(Some(job));
                    }
                    None => {
                        tracing::warn!(job_id = %id, "dropping queued id with no job record");
                    }
                }
            }
        }
        Ok(None)
    }

    /// Records success. Replaying on a terminal job is a no-op.
    pub async fn complete(&self, id: &str, result: Value) -> Result<(), JobError> {
        self.store.srem(PROCESSING_KEY, id).await?;
        let mut job = match self.job(id).await? {
            Some(job) => job,
            None => {
                tracing::warn!(job_id = %id, "complete() for unknown job; discarding");
                return Ok(());
            }
        };
        if job.is_terminal() {
            return Ok(());
        }
        job.completed_at = Some(now_ms());
        job.result = Some(result);
        self.save(&job).await?;
        #[cfg(feature = "metrics")]
        counter!("flowgate_jobs_completed_total", "kind" => job.kind.as_str()).increment(1);
        tracing::info!(job_id = %id, kind = %job.kind, attempts = job.attempts, "job completed");
        Ok(())
    }

    /// Records failure: reschedules with exponential delay while attempts
    /// remain, otherwise marks the job terminally failed. Replaying on a
    /// terminal job is a no-op.
    pub async fn fail(&self, id: &str, error: &str) -> Result<(), JobError> {
        self.store.srem(PROCESSING_KEY, id).await?;
        let mut job = match self.job(id).await? {
            Some(job) => job,
            None => {
                tracing::warn!(job_id = %id, "fail() for unknown job; discarding");
                return Ok(());
            }
        };
        if job.is_terminal() {
            return Ok(());
        }
        job.last_error = Some(error.to_string());

        if job.attempts < job.max_attempts {
            let exp = job.attempts.saturating_sub(1).min(31);
            let delay = self.retry_base.saturating_mul(1u32 << exp);
            let due = now_ms() + delay.as_millis() as u64;
            job.scheduled_at = Some(due);
            job.started_at = None;
            self.save(&job).await?;
            self.store.zadd(SCHEDULED_KEY, due as f64, id).await?;
            tracing::warn!(
                job_id = %id,
                kind = %job.kind,
                attempt = job.attempts,
                retry_in_ms = delay.as_millis() as u64,
                error,
                "job failed; retry scheduled"
            );
        } else {
            job.failed_at = Some(now_ms());
            self.save(&job).await?;
            #[cfg(feature = "metrics")]
            counter!("flowgate_jobs_failed_total", "kind" => job.kind.as_str()).increment(1);
            tracing::error!(
                job_id = %id,
                kind = %job.kind,
                attempts = job.attempts,
                error,
                "job failed terminally"
            );
        }
        Ok(())
    }

    /// Sizes of every queue structure.
    pub async fn stats(&self) -> Result<QueueStats, JobError> {
        Ok(QueueStats {
            critical: self.store.llen(&Priority::Critical.queue_key()).await?,
            high: self.store.llen(&Priority::High.queue_key()).await?,
            medium: self.store.llen(&Priority::Medium.queue_key()).await?,
            low: self.store.llen(&Priority::Low.queue_key()).await?,
            processing: self.store.scard(PROCESSING_KEY).await?,
            scheduled: self.store.zcard(SCHEDULED_KEY).await?,
        })
    }

    /// Start-time recovery: requeues claims older than `stale_lease` and
    /// promotes any scheduled entries that came due while the process was
    /// down. Returns how many claims were requeued.
    pub async fn recover(&self, stale_lease: Duration) -> Result<usize, JobError> {
        let now = now_ms();
        let mut requeued = 0;
        for id in self.store.smembers(PROCESSING_KEY).await? {
            match self.job(&id).await? {
                Some(mut job) => {
                    let abandoned = job
                        .started_at
                        .map(|started| started + stale_lease.as_millis() as u64 <= now)
                        .unwrap_or(true);
                    if abandoned {
                        self.store.srem(PROCESSING_KEY, &id).await?;
                        job.started_at = None;
                        self.save(&job).await?;
                        self.store.lpush(&job.priority.queue_key(), &id).await?;
                        requeued += 1;
                        tracing::warn!(job_id = %id, kind = %job.kind, "recovered abandoned claim");
                    }
                }
                None => {
                    self.store.srem(PROCESSING_KEY, &id).await?;
                    tracing::warn!(job_id = %id, "dropping processing id with no job record");
                }
            }
        }
        self.promote_due().await?;
        if requeued > 0 {
            self.wake.notify_one();
        }
        Ok(requeued)
    }

    /// Deletes terminal jobs older than `older_than`. Returns how many were
    /// purged.
    pub async fn purge_terminal(&self, older_than: Duration) -> Result<usize, JobError> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as u64);
        let mut purged = 0;
        for key in self.store.keys("job:*").await? {
            let raw = match self.store.get(&key).await? {
                Some(raw) => raw,
                None => continue,
            };
            let job: Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "skipping unreadable job record");
                    continue;
                }
            };
            if matches!(job.terminal_at(), Some(at) if at <= cutoff) {
                self.store.del(&[key.as_str()]).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
