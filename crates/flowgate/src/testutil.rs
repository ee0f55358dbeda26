//! Fixtures shared by the facade and engine tests.

use flowgate_cache::CacheStore;
use flowgate_core::MemoryStore;
use flowgate_ratelimit::RateLimiter;
use flowgate_upstream::{
    ApiGateway, ChainExplorer, ChainNode, DocumentSource, GraphSource, PriceFeed, Sources,
    UpstreamError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Handles {
    pub cache: Arc<CacheStore>,
    pub graph_calls: Arc<AtomicUsize>,
    pub fail_graph: Arc<AtomicBool>,
}

struct StubSources {
    delay: Duration,
    graph_calls: Arc<AtomicUsize>,
    fail_graph: Arc<AtomicBool>,
}

impl StubSources {
    fn graph_result(&self, payload: Value) -> Result<Value, UpstreamError> {
        if self.fail_graph.load(Ordering::SeqCst) {
            Err(UpstreamError::Permanent {
                status: Some(400),
                message: "graph rejected the query".to_string(),
            })
        } else {
            Ok(payload)
        }
    }
}

#[async_trait::async_trait]
impl PriceFeed for StubSources {
    async fn simple_price(&self, _ids: &str, _vs: &str) -> Result<Value, UpstreamError> {
        Ok(json!({"usd": 3000.0}))
    }
}

#[async_trait::async_trait]
impl ChainExplorer for StubSources {
    async fn gas_oracle(&self) -> Result<Value, UpstreamError> {
        Ok(json!({"SafeGasPrice": "25", "ProposeGasPrice": "40", "FastGasPrice": "55"}))
    }

    async fn address_transactions(&self, _address: &str) -> Result<Value, UpstreamError> {
        Ok(json!([]))
    }
}

#[async_trait::async_trait]
impl ChainNode for StubSources {
    async fn block_number(&self) -> Result<u64, UpstreamError> {
        Ok(19_000_000)
    }

    async fn chain_health(&self) -> Result<Value, UpstreamError> {
        Ok(json!({"syncing": false}))
    }
}

#[async_trait::async_trait]
impl GraphSource for StubSources {
    async fn wallet_network(&self, address: &str, depth: u32) -> Result<Value, UpstreamError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.graph_result(json!({"root": address, "depth": depth, "nodes": []}))
    }

    async fn wallet_rankings(&self, page: u32, page_size: u32) -> Result<Value, UpstreamError> {
        Ok(json!({"page": page, "page_size": page_size, "entries": []}))
    }

    async fn top_wallets(&self, limit: u32) -> Result<Value, UpstreamError> {
        Ok(json!({"wallets": [], "limit": limit}))
    }

    async fn risk_score(&self, address: &str) -> Result<Value, UpstreamError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        self.graph_result(json!({"address": address, "score": 12}))
    }

    async fn dashboard_stats(&self) -> Result<Value, UpstreamError> {
        Ok(json!({"wallets": 1000, "transactions": 50_000}))
    }
}

#[async_trait::async_trait]
impl DocumentSource for StubSources {
    async fn transaction_data(&self, tx_hash: &str) -> Result<Value, UpstreamError> {
        Ok(json!({"hash": tx_hash}))
    }
}

pub(crate) fn sources(delay: Duration) -> (Sources, Arc<AtomicUsize>, Arc<AtomicBool>) {
    let graph_calls = Arc::new(AtomicUsize::new(0));
    let fail_graph = Arc::new(AtomicBool::new(false));
    let stub = Arc::new(StubSources {
        delay,
        graph_calls: Arc::clone(&graph_calls),
        fail_graph: Arc::clone(&fail_graph),
    });
    let sources = Sources {
        price: Arc::clone(&stub) as Arc<dyn PriceFeed>,
        explorer: Arc::clone(&stub) as Arc<dyn ChainExplorer>,
        node: Arc::clone(&stub) as Arc<dyn ChainNode>,
        graph: Arc::clone(&stub) as Arc<dyn GraphSource>,
        documents: stub as Arc<dyn DocumentSource>,
    };
    (sources, graph_calls, fail_graph)
}

pub(crate) fn gateway(delay: Duration) -> (Arc<ApiGateway>, Handles) {
    let (sources, graph_calls, fail_graph) = sources(delay);
    let cache = Arc::new(CacheStore::new(Arc::new(MemoryStore::new())));
    let limiter = Arc::new(RateLimiter::with_default_buckets(
        Duration::from_millis(1),
        Duration::from_millis(1),
    ));
    let gateway = Arc::new(ApiGateway::new(Arc::clone(&cache), limiter, sources));
    (
        gateway,
        Handles {
            cache,
            graph_calls,
            fail_graph,
        },
    )
}
