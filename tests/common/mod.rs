//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use flowgate_cache::CacheStore;
use flowgate_core::{KeyValueStore, KvError};
use flowgate_ratelimit::RateLimiter;
use flowgate_upstream::{
    ApiGateway, ChainExplorer, ChainNode, DocumentSource, GraphSource, PriceFeed, Sources,
    UpstreamError,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One mock standing in for every upstream.
///
/// The price feed replays a script (empty script = a default success);
/// the graph store optionally delays to model slow upstreams. Call counters
/// let tests assert single-flight and caching behavior.
#[derive(Default)]
pub struct TestUpstreams {
    pub price_script: Mutex<VecDeque<Result<Value, UpstreamError>>>,
    pub price_calls: AtomicUsize,
    pub graph_calls: AtomicUsize,
    pub graph_delay: Duration,
}

impl TestUpstreams {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_graph_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            graph_delay: delay,
            ..Self::default()
        })
    }

    pub fn script_price(&self, results: Vec<Result<Value, UpstreamError>>) {
        *self.price_script.lock().unwrap() = results.into();
    }

    pub fn price_call_count(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn graph_call_count(&self) -> usize {
        self.graph_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for TestUpstreams {
    async fn simple_price(&self, _ids: &str, _vs: &str) -> Result<Value, UpstreamError> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.price_script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(json!({"usd": 3123.45})),
        }
    }
}

#[async_trait]
impl ChainExplorer for TestUpstreams {
    async fn gas_oracle(&self) -> Result<Value, UpstreamError> {
        Ok(json!({"SafeGasPrice": "25", "ProposeGasPrice": "40", "FastGasPrice": "55"}))
    }

    async fn address_transactions(&self, _address: &str) -> Result<Value, UpstreamError> {
        Ok(json!([]))
    }
}

#[async_trait]
impl ChainNode for TestUpstreams {
    async fn block_number(&self) -> Result<u64, UpstreamError> {
        Ok(19_000_000)
    }

    async fn chain_health(&self) -> Result<Value, UpstreamError> {
        Ok(json!({"syncing": false}))
    }
}

#[async_trait]
impl GraphSource for TestUpstreams {
    async fn wallet_network(&self, address: &str, depth: u32) -> Result<Value, UpstreamError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        if !self.graph_delay.is_zero() {
            tokio::time::sleep(self.graph_delay).await;
        }
        Ok(json!({"root": address, "depth": depth, "nodes": ["0x1", "0x2"]}))
    }

    async fn wallet_rankings(&self, page: u32, page_size: u32) -> Result<Value, UpstreamError> {
        Ok(json!({"page": page, "page_size": page_size, "entries": []}))
    }

    async fn top_wallets(&self, limit: u32) -> Result<Value, UpstreamError> {
        Ok(json!({"wallets": ["0x1", "0x2"], "limit": limit}))
    }

    async fn risk_score(&self, address: &str) -> Result<Value, UpstreamError> {
        Ok(json!({"address": address, "score": 12}))
    }

    async fn dashboard_stats(&self) -> Result<Value, UpstreamError> {
        Ok(json!({"wallets": 1000, "transactions": 50_000}))
    }
}

#[async_trait]
impl DocumentSource for TestUpstreams {
    async fn transaction_data(&self, tx_hash: &str) -> Result<Value, UpstreamError> {
        Ok(json!({"hash": tx_hash}))
    }
}

pub fn sources_from(upstreams: &Arc<TestUpstreams>) -> Sources {
    Sources {
        price: Arc::clone(upstreams) as Arc<dyn PriceFeed>,
        explorer: Arc::clone(upstreams) as Arc<dyn ChainExplorer>,
        node: Arc::clone(upstreams) as Arc<dyn ChainNode>,
        graph: Arc::clone(upstreams) as Arc<dyn GraphSource>,
        documents: Arc::clone(upstreams) as Arc<dyn DocumentSource>,
    }
}

/// Cache + gateway over the given store, with the documented default
/// rate-bucket gaps.
pub fn build_gateway(
    store: Arc<dyn KeyValueStore>,
    upstreams: &Arc<TestUpstreams>,
) -> (Arc<CacheStore>, Arc<ApiGateway>) {
    let cache = Arc::new(CacheStore::new(store));
    let limiter = Arc::new(RateLimiter::with_default_buckets(
        Duration::from_millis(1200),
        Duration::from_millis(200),
    ));
    let gateway = Arc::new(ApiGateway::new(
        Arc::clone(&cache),
        limiter,
        sources_from(upstreams),
    ));
    (cache, gateway)
}

fn outage<T>() -> Result<T, KvError> {
    Err(KvError::Unavailable("injected outage".to_string()))
}

/// A shared store that is down: every operation errors.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        outage()
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), KvError> {
        outage()
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvError> {
        outage()
    }

    async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, KvError> {
        outage()
    }

    async fn del(&self, _keys: &[&str]) -> Result<u64, KvError> {
        outage()
    }

    async fn exists(&self, _key: &str) -> Result<bool, KvError> {
        outage()
    }

    async fn incr_ex(&self, _key: &str, _window: Duration) -> Result<u64, KvError> {
        outage()
    }

    async fn lpush(&self, _key: &str, _value: &str) -> Result<u64, KvError> {
        outage()
    }

    async fn rpop(&self, _key: &str) -> Result<Option<String>, KvError> {
        outage()
    }

    async fn llen(&self, _key: &str) -> Result<u64, KvError> {
        outage()
    }

    async fn sadd(&self, _key: &str, _member: &str) -> Result<bool, KvError> {
        outage()
    }

    async fn srem(&self, _key: &str, _member: &str) -> Result<bool, KvError> {
        outage()
    }

    async fn scard(&self, _key: &str) -> Result<u64, KvError> {
        outage()
    }

    async fn smembers(&self, _key: &str) -> Result<Vec<String>, KvError> {
        outage()
    }

    async fn zadd(&self, _key: &str, _score: f64, _member: &str) -> Result<bool, KvError> {
        outage()
    }

    async fn zrange_by_score(
        &self,
        _key: &str,
        _min: f64,
        _max: f64,
    ) -> Result<Vec<String>, KvError> {
        outage()
    }

    async fn zrem(&self, _key: &str, _member: &str) -> Result<bool, KvError> {
        outage()
    }

    async fn zcard(&self, _key: &str) -> Result<u64, KvError> {
        outage()
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, KvError> {
        outage()
    }
}
