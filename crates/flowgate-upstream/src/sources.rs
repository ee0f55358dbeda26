//! Capability interfaces over the stores and external APIs the gateway
//! fans out to.
//!
//! The engine never talks to a database driver or HTTP endpoint directly;
//! each upstream is an object-safe trait returning opaque JSON payloads.
//! Production implementations for the HTTP upstreams live in [`crate::http`];
//! the graph/document stores are injected by the host application.

use crate::UpstreamError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// The external price feed (`GET /simple/price`).
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current prices for `ids` quoted in `vs_currencies`.
    async fn simple_price(&self, ids: &str, vs_currencies: &str) -> Result<Value, UpstreamError>;
}

/// The chain explorer API (gas oracle, transaction listings).
#[async_trait]
pub trait ChainExplorer: Send + Sync {
    /// Current gas oracle readings.
    async fn gas_oracle(&self) -> Result<Value, UpstreamError>;

    /// Transactions involving `address`.
    async fn address_transactions(&self, address: &str) -> Result<Value, UpstreamError>;
}

/// A JSON-RPC chain node.
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, UpstreamError>;

    /// Node health (sync state and peers).
    async fn chain_health(&self) -> Result<Value, UpstreamError>;
}

/// The graph store holding wallet topology.
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Relationship graph around `address` up to `depth` hops.
    async fn wallet_network(&self, address: &str, depth: u32) -> Result<Value, UpstreamError>;

    /// Paged wallet rankings.
    async fn wallet_rankings(&self, page: u32, page_size: u32) -> Result<Value, UpstreamError>;

    /// Top wallets by recent activity.
    async fn top_wallets(&self, limit: u32) -> Result<Value, UpstreamError>;

    /// Risk score for `address`.
    async fn risk_score(&self, address: &str) -> Result<Value, UpstreamError>;

    /// Aggregated dashboard statistics.
    async fn dashboard_stats(&self) -> Result<Value, UpstreamError>;
}

/// The document store holding raw transactions.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// The raw transaction document for `tx_hash`.
    async fn transaction_data(&self, tx_hash: &str) -> Result<Value, UpstreamError>;
}

/// The full set of upstream handles the gateway is constructed with.
#[derive(Clone)]
pub struct Sources {
    /// Price feed API.
    pub price: Arc<dyn PriceFeed>,
    /// Chain explorer API.
    pub explorer: Arc<dyn ChainExplorer>,
    /// JSON-RPC chain node.
    pub node: Arc<dyn ChainNode>,
    /// Graph store.
    pub graph: Arc<dyn GraphSource>,
    /// Document store.
    pub documents: Arc<dyn DocumentSource>,
}
