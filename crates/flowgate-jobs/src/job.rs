//! Job records and their closed kind set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The closed set of background job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Refresh prices and the gas tracker.
    MarketDataCrawl,
    /// Discover the most active wallets.
    PopularWalletsDiscovery,
    /// Refresh per-chain network statistics.
    NetworkStatsCrawl,
    /// Refresh cached data for a batch of wallet addresses.
    WalletRefresh,
    /// Purge terminal jobs and trim history keys.
    DataCleanup,
}

impl JobKind {
    /// Every kind, in scheduling-table order.
    pub const ALL: [JobKind; 5] = [
        JobKind::MarketDataCrawl,
        JobKind::NetworkStatsCrawl,
        JobKind::WalletRefresh,
        JobKind::PopularWalletsDiscovery,
        JobKind::DataCleanup,
    ];

    /// The snake_case name used in records and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::MarketDataCrawl => "market_data_crawl",
            JobKind::PopularWalletsDiscovery => "popular_wallets_discovery",
            JobKind::NetworkStatsCrawl => "network_stats_crawl",
            JobKind::WalletRefresh => "wallet_refresh",
            JobKind::DataCleanup => "data_cleanup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue priority. Higher priorities drain fully before lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Drained first.
    Critical,
    /// Drained after critical.
    High,
    /// The default for ad-hoc triggers.
    Medium,
    /// Housekeeping; cleanup always runs here.
    Low,
}

impl Priority {
    /// Priorities in drain order.
    pub const DRAIN_ORDER: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// The snake_case name used in queue keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// The shared-store list this priority drains from.
    pub fn queue_key(&self) -> String {
        format!("jobs:queue:{}", self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed per-kind job arguments, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// No arguments; the crawler refreshes the standard pairs.
    MarketDataCrawl {},
    /// Discover the top `limit` wallets.
    PopularWalletsDiscovery {
        /// How many wallets to keep.
        limit: u32,
    },
    /// Refresh statistics for one chain.
    NetworkStatsCrawl {
        /// Chain name, e.g. `ethereum`.
        chain: String,
    },
    /// Refresh cached data for these addresses.
    WalletRefresh {
        /// Batch of addresses (bounded by the configured batch size).
        addresses: Vec<String>,
    },
    /// No arguments; retention windows come from the crawler config.
    DataCleanup {},
}

impl JobPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::MarketDataCrawl {} => JobKind::MarketDataCrawl,
            JobPayload::PopularWalletsDiscovery { .. } => JobKind::PopularWalletsDiscovery,
            JobPayload::NetworkStatsCrawl { .. } => JobKind::NetworkStatsCrawl,
            JobPayload::WalletRefresh { .. } => JobKind::WalletRefresh,
            JobPayload::DataCleanup {} => JobKind::DataCleanup,
        }
    }
}

/// Lifecycle state, derived from a job's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting in a priority queue or the scheduled index.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure (attempts exhausted).
    Failed,
}

/// A background job record, stored under `job:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique id.
    pub id: String,
    /// Kind, duplicated out of the payload for cheap dispatch.
    pub kind: JobKind,
    /// Typed arguments.
    pub payload: JobPayload,
    /// Queue priority.
    pub priority: Priority,
    /// Executions so far.
    pub attempts: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Creation time, epoch ms.
    pub created_at: u64,
    /// Due time when deferred (retry or future schedule), epoch ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<u64>,
    /// Set on claim; cleared again when a failure is rescheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    /// Terminal success time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// Terminal failure time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<u64>,
    /// Most recent failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Crawler result recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Job {
    /// Exactly one state holds at any time, derived from the timestamps.
    pub fn status(&self) -> JobStatus {
        if self.completed_at.is_some() {
            JobStatus::Completed
        } else if self.failed_at.is_some() {
            JobStatus::Failed
        } else if self.started_at.is_some() {
            JobStatus::Processing
        } else {
            JobStatus::Pending
        }
    }

    /// Whether the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), JobStatus::Completed | JobStatus::Failed)
    }

    /// When the job reached its terminal state, if it has.
    pub fn terminal_at(&self) -> Option<u64> {
        self.completed_at.or(self.failed_at)
    }
}
