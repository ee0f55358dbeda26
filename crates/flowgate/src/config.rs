//! Environment-driven engine configuration.
//!
//! Unparseable values are logged and fall back to their defaults; the engine
//! config is operational tuning, not a safety boundary.

use flowgate_cache::{CacheDomain, TtlPolicy};
use flowgate_jobs::JobKind;
use std::collections::HashMap;
use std::time::Duration;

/// Recognized configuration, with compiled-in defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `JOBS_ENABLED`: master switch for the scheduler and worker pool.
    pub jobs_enabled: bool,
    /// `JOB_INTERVAL_<KIND>`: per-kind cron expression overrides.
    pub job_intervals: HashMap<JobKind, String>,
    /// `JOB_BATCH_SIZE_WALLETS`: address batch cap for wallet refreshes.
    pub wallet_batch_size: usize,
    /// `JOB_MAX_RETRIES`: default job attempt budget.
    pub job_max_retries: u32,
    /// `JOB_RETRY_DELAY` (ms): base for the job retry backoff.
    pub job_retry_delay: Duration,
    /// `JOB_HIGH_PRIORITY_WALLETS`: comma-separated addresses always
    /// included in wallet refreshes.
    pub high_priority_wallets: Vec<String>,
    /// `PRICE_FEED_MIN_GAP_MS`: price-feed rate bucket gap.
    pub price_feed_min_gap: Duration,
    /// `CHAIN_EXPLORER_MIN_GAP_MS`: chain-explorer rate bucket gap.
    pub chain_explorer_min_gap: Duration,
    /// `CACHE_TTL_<DOMAIN>` (s): per-domain fresh TTL overrides.
    pub cache_ttl_overrides: HashMap<CacheDomain, Duration>,
    /// Worker pool size. All jobs are idempotent; the default of one is the
    /// conservative choice.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs_enabled: true,
            job_intervals: HashMap::new(),
            wallet_batch_size: 20,
            job_max_retries: 3,
            job_retry_delay: Duration::from_millis(5_000),
            high_priority_wallets: Vec::new(),
            price_feed_min_gap: Duration::from_millis(1_200),
            chain_explorer_min_gap: Duration::from_millis(200),
            cache_ttl_overrides: HashMap::new(),
            workers: 1,
        }
    }
}

impl EngineConfig {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`; what tests inject.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("JOBS_ENABLED") {
            match parse_bool(&raw) {
                Some(enabled) => config.jobs_enabled = enabled,
                None => tracing::warn!(%raw, "ignoring unparseable JOBS_ENABLED"),
            }
        }
        for kind in JobKind::ALL {
            let name = format!("JOB_INTERVAL_{}", kind.as_str().to_uppercase());
            if let Some(expr) = lookup(&name) {
                config.job_intervals.insert(kind, expr);
            }
        }
        if let Some(raw) = lookup("JOB_BATCH_SIZE_WALLETS") {
            match raw.parse::<usize>() {
                Ok(size) if size > 0 => config.wallet_batch_size = size,
                _ => tracing::warn!(%raw, "ignoring unparseable JOB_BATCH_SIZE_WALLETS"),
            }
        }
        if let Some(raw) = lookup("JOB_MAX_RETRIES") {
            match raw.parse::<u32>() {
                Ok(retries) if retries > 0 => config.job_max_retries = retries,
                _ => tracing::warn!(%raw, "ignoring unparseable JOB_MAX_RETRIES"),
            }
        }
        if let Some(duration) = parse_ms(&lookup, "JOB_RETRY_DELAY") {
            config.job_retry_delay = duration;
        }
        if let Some(raw) = lookup("JOB_HIGH_PRIORITY_WALLETS") {
            config.high_priority_wallets = raw
                .split(',')
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(duration) = parse_ms(&lookup, "PRICE_FEED_MIN_GAP_MS") {
            config.price_feed_min_gap = duration;
        }
        if let Some(duration) = parse_ms(&lookup, "CHAIN_EXPLORER_MIN_GAP_MS") {
            config.chain_explorer_min_gap = duration;
        }
        for domain in CacheDomain::ALL {
            let name = format!("CACHE_TTL_{}", domain.as_str().to_uppercase());
            if let Some(raw) = lookup(&name) {
                match raw.parse::<u64>() {
                    Ok(secs) if secs > 0 => {
                        config
                            .cache_ttl_overrides
                            .insert(domain, Duration::from_secs(secs));
                    }
                    _ => tracing::warn!(%name, %raw, "ignoring unparseable cache ttl override"),
                }
            }
        }

        config
    }

    /// The TTL override table for the cache layer.
    pub fn ttl_policy(&self) -> TtlPolicy {
        self.cache_ttl_overrides
            .iter()
            .fold(TtlPolicy::new(), |policy, (&domain, &fresh)| {
                policy.with_override(domain, fresh)
            })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_ms(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    let raw = lookup(name)?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(name, %raw, "ignoring unparseable duration");
            None
        }
    }
}
