//! Cron-driven job emission.
//!
//! Tick evaluation is a pure function of (expression, last evaluation, now),
//! so the schedule is testable without wall-clock sleeps; the run loop just
//! feeds it the current time once a second. State is process-local: after a
//! restart the next natural tick fires.

use crate::{JobError, JobKind, JobPayload, JobQueue, Priority};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A five-field (minute-resolution) cron expression.
#[derive(Debug, Clone)]
pub struct CronSpec {
    schedule: Schedule,
    expr: String,
}

impl CronSpec {
    /// Parses a standard five-field expression.
    pub fn parse(expr: &str) -> Result<Self, JobError> {
        let expr = expr.trim();
        // The parser wants a seconds field; pin it to zero to keep
        // minute-level resolution.
        let with_seconds = format!("0 {expr}");
        let schedule = Schedule::from_str(&with_seconds).map_err(|err| JobError::InvalidCron {
            expr: expr.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            schedule,
            expr: expr.to_string(),
        })
    }

    /// The original five-field expression.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// All fire times in the half-open window `(after, upto]`.
    pub fn fires_between(&self, after: DateTime<Utc>, upto: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .take_while(|fire| *fire <= upto)
            .collect()
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// One scheduled job kind.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// The kind to enqueue.
    pub kind: JobKind,
    /// When to enqueue it.
    pub spec: CronSpec,
    /// Queue priority for the emitted jobs.
    pub priority: Priority,
}

/// Default arguments for scheduler-emitted jobs.
#[derive(Debug, Clone)]
pub struct CrawlDefaults {
    /// Chain refreshed by `network_stats_crawl`.
    pub chain: String,
    /// Listing size for `popular_wallets_discovery`.
    pub popular_limit: u32,
    /// Address batch cap for `wallet_refresh`.
    pub wallet_batch_size: usize,
    /// Addresses always included in `wallet_refresh`.
    pub high_priority_wallets: Vec<String>,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            chain: "ethereum".to_string(),
            popular_limit: 100,
            wallet_batch_size: 20,
            high_priority_wallets: Vec::new(),
        }
    }
}

impl CrawlDefaults {
    /// The payload the scheduler emits for `kind`.
    pub fn payload_for(&self, kind: JobKind) -> JobPayload {
        match kind {
            JobKind::MarketDataCrawl => JobPayload::MarketDataCrawl {},
            JobKind::PopularWalletsDiscovery => JobPayload::PopularWalletsDiscovery {
                limit: self.popular_limit,
            },
            JobKind::NetworkStatsCrawl => JobPayload::NetworkStatsCrawl {
                chain: self.chain.clone(),
            },
            JobKind::WalletRefresh => JobPayload::WalletRefresh {
                addresses: self
                    .high_priority_wallets
                    .iter()
                    .take(self.wallet_batch_size)
                    .cloned()
                    .collect(),
            },
            JobKind::DataCleanup => JobPayload::DataCleanup {},
        }
    }
}

fn default_expr(kind: JobKind) -> &'static str {
    match kind {
        JobKind::MarketDataCrawl => "*/5 * * * *",
        JobKind::NetworkStatsCrawl => "*/10 * * * *",
        JobKind::WalletRefresh => "0 */2 * * *",
        JobKind::PopularWalletsDiscovery => "0 */6 * * *",
        JobKind::DataCleanup => "0 2 * * *",
    }
}

fn default_priority(kind: JobKind) -> Priority {
    match kind {
        JobKind::MarketDataCrawl => Priority::High,
        JobKind::NetworkStatsCrawl => Priority::Medium,
        JobKind::WalletRefresh => Priority::Medium,
        JobKind::PopularWalletsDiscovery => Priority::Medium,
        JobKind::DataCleanup => Priority::Low,
    }
}

/// Builds the schedule table, applying per-kind expression overrides.
pub fn schedule_table(
    overrides: &HashMap<JobKind, String>,
) -> Result<Vec<ScheduleEntry>, JobError> {
    JobKind::ALL
        .iter()
        .map(|&kind| {
            let expr = overrides
                .get(&kind)
                .map(String::as_str)
                .unwrap_or_else(|| default_expr(kind));
            Ok(ScheduleEntry {
                kind,
                spec: CronSpec::parse(expr)?,
                priority: default_priority(kind),
            })
        })
        .collect()
}

/// The scheduler: evaluates the table and enqueues due jobs.
pub struct Scheduler {
    queue: Arc<JobQueue>,
    entries: Vec<ScheduleEntry>,
    defaults: CrawlDefaults,
    last_checked: DateTime<Utc>,
    last_enqueued: HashMap<JobKind, String>,
}

impl Scheduler {
    /// Creates a scheduler anchored at the current time.
    pub fn new(queue: Arc<JobQueue>, entries: Vec<ScheduleEntry>, defaults: CrawlDefaults) -> Self {
        Self {
            queue,
            entries,
            defaults,
            last_checked: Utc::now(),
            last_enqueued: HashMap::new(),
        }
    }

    /// Re-anchors the evaluation window; ticks strictly after `start` fire.
    pub fn starting_from(mut self, start: DateTime<Utc>) -> Self {
        self.last_checked = start;
        self
    }

    /// Evaluates every entry against `now`, enqueuing at most one job per
    /// kind whose cron fired since the previous evaluation. A kind whose
    /// previous instance is still queued or processing skips its tick.
    /// Returns how many jobs were enqueued.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let since = self.last_checked;
        self.last_checked = now;

        let entries = self.entries.clone();
        let mut enqueued = 0;
        for entry in &entries {
            let fires = entry.spec.fires_between(since, now);
            if fires.is_empty() {
                continue;
            }
            if self.kind_active(entry.kind).await? {
                tracing::debug!(kind = %entry.kind, "previous run still active; skipping tick");
                continue;
            }
            let payload = self.defaults.payload_for(entry.kind);
            let id = self.queue.enqueue(payload, entry.priority, None).await?;
            self.last_enqueued.insert(entry.kind, id);
            enqueued += 1;
        }
        Ok(enqueued)
    }

    async fn kind_active(&self, kind: JobKind) -> Result<bool, JobError> {
        if let Some(id) = self.last_enqueued.get(&kind) {
            if let Some(job) = self.queue.job(id).await? {
                return Ok(!job.is_terminal());
            }
        }
        Ok(false)
    }

    /// Runs the evaluation loop until `ctx` is cancelled. The loop observes
    /// cancellation within a second.
    pub async fn run(mut self, ctx: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(entries = self.entries.len(), "scheduler started");
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    tracing::info!("scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.poll(Utc::now()).await {
                tracing::warn!(error = %err, "scheduler poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;
    use chrono::TimeZone;
    use flowgate_core::MemoryStore;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn five_field_expressions_parse() {
        for kind in JobKind::ALL {
            CronSpec::parse(default_expr(kind)).unwrap();
        }
        assert!(CronSpec::parse("not a cron").is_err());
    }

    #[test]
    fn fires_between_is_deterministic() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let fires = spec.fires_between(at(0, 0), at(0, 12));
        assert_eq!(fires, vec![at(0, 5), at(0, 10)]);

        let daily = CronSpec::parse("0 2 * * *").unwrap();
        let fires = daily.fires_between(at(0, 0), at(23, 59));
        assert_eq!(fires, vec![at(2, 0)]);
        assert!(daily.fires_between(at(3, 0), at(23, 0)).is_empty());
    }

    #[test]
    fn next_after_skips_the_anchor() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        assert_eq!(spec.next_after(at(0, 5)), Some(at(0, 10)));
    }

    #[test]
    fn overrides_replace_default_expressions() {
        let mut overrides = HashMap::new();
        overrides.insert(JobKind::MarketDataCrawl, "*/1 * * * *".to_string());
        let table = schedule_table(&overrides).unwrap();
        let market = table
            .iter()
            .find(|entry| entry.kind == JobKind::MarketDataCrawl)
            .unwrap();
        assert_eq!(market.spec.expr(), "*/1 * * * *");

        let cleanup = table
            .iter()
            .find(|entry| entry.kind == JobKind::DataCleanup)
            .unwrap();
        assert_eq!(cleanup.spec.expr(), "0 2 * * *");
        assert_eq!(cleanup.priority, Priority::Low);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut overrides = HashMap::new();
        overrides.insert(JobKind::DataCleanup, "nope".to_string());
        assert!(matches!(
            schedule_table(&overrides),
            Err(JobError::InvalidCron { .. })
        ));
    }

    fn market_only_scheduler(queue: Arc<JobQueue>) -> Scheduler {
        let entries = vec![ScheduleEntry {
            kind: JobKind::MarketDataCrawl,
            spec: CronSpec::parse("*/5 * * * *").unwrap(),
            priority: Priority::High,
        }];
        Scheduler::new(queue, entries, CrawlDefaults::default()).starting_from(at(0, 0))
    }

    #[tokio::test]
    async fn poll_enqueues_one_job_per_due_tick() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let mut scheduler = market_only_scheduler(Arc::clone(&queue));

        // No tick inside (00:00, 00:04].
        assert_eq!(scheduler.poll(at(0, 4)).await.unwrap(), 0);
        // 00:05 fires exactly once, even evaluated late.
        assert_eq!(scheduler.poll(at(0, 6)).await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().high, 1);
    }

    #[tokio::test]
    async fn missed_ticks_coalesce_into_one_job() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let mut scheduler = market_only_scheduler(Arc::clone(&queue));

        // Three fires (00:05, 00:10, 00:15) land in one evaluation.
        assert_eq!(scheduler.poll(at(0, 16)).await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().high, 1);
    }

    #[tokio::test]
    async fn tick_is_skipped_while_previous_run_is_active() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let mut scheduler = market_only_scheduler(Arc::clone(&queue));

        assert_eq!(scheduler.poll(at(0, 5)).await.unwrap(), 1);
        // Still pending at the next tick: skipped.
        assert_eq!(scheduler.poll(at(0, 10)).await.unwrap(), 0);

        // Claim and complete it; the following tick fires again.
        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert_eq!(scheduler.poll(at(0, 15)).await.unwrap(), 0);
        queue.complete(&job.id, json!(null)).await.unwrap();
        assert_eq!(scheduler.poll(at(0, 20)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wallet_refresh_payload_carries_the_batched_addresses() {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryStore::new())));
        let defaults = CrawlDefaults {
            wallet_batch_size: 2,
            high_priority_wallets: vec![
                "0xa".to_string(),
                "0xb".to_string(),
                "0xc".to_string(),
            ],
            ..CrawlDefaults::default()
        };
        let entries = vec![ScheduleEntry {
            kind: JobKind::WalletRefresh,
            spec: CronSpec::parse("*/5 * * * *").unwrap(),
            priority: Priority::Medium,
        }];
        let mut scheduler =
            Scheduler::new(Arc::clone(&queue), entries, defaults).starting_from(at(0, 0));

        scheduler.poll(at(0, 5)).await.unwrap();
        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(
            job.payload,
            JobPayload::WalletRefresh {
                addresses: vec!["0xa".to_string(), "0xb".to_string()],
            }
        );
    }
}
