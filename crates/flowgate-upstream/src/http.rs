//! Production HTTP implementations of the upstream capability traits.
//!
//! All clients share the same discipline: 10 s request timeout, API-key
//! authentication where the upstream wants it, a response-size cap, and
//! status mapping into the [`UpstreamError`] taxonomy (429 with its
//! `Retry-After` hint, 5xx transient, other 4xx permanent).

use crate::sources::{ChainExplorer, ChainNode, PriceFeed};
use crate::UpstreamError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Connection settings shared by the HTTP upstream clients.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Endpoint base URL.
    pub base_url: String,
    /// API key, sent where the upstream expects it.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Response-size cap; larger bodies are rejected at source.
    pub max_payload_bytes: usize,
}

impl HttpConfig {
    /// Settings for `base_url` with the default 10 s timeout and 1 MiB cap.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
            max_payload_bytes: 1024 * 1024,
        }
    }

    /// Attaches an API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

fn build_client(config: &HttpConfig) -> Result<Client, UpstreamError> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|err| UpstreamError::Permanent {
            status: None,
            message: format!("http client construction failed: {err}"),
        })
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(timeout)
    } else {
        UpstreamError::Transient(err.to_string())
    }
}

async fn read_json(response: Response, max_bytes: usize) -> Result<Value, UpstreamError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(UpstreamError::RateLimited { retry_after });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(UpstreamError::from_status(status.as_u16(), snippet));
    }
    if let Some(len) = response.content_length() {
        if len as usize > max_bytes {
            return Err(UpstreamError::PayloadTooLarge {
                size: len as usize,
                limit: max_bytes,
            });
        }
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| UpstreamError::Transient(err.to_string()))?;
    if bytes.len() > max_bytes {
        return Err(UpstreamError::PayloadTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    serde_json::from_slice(&bytes).map_err(|err| UpstreamError::Permanent {
        status: None,
        message: format!("malformed payload: {err}"),
    })
}

fn parse_hex_quantity(value: &Value) -> Result<u64, UpstreamError> {
    let raw = value.as_str().ok_or_else(|| UpstreamError::Permanent {
        status: None,
        message: format!("expected hex quantity, got {value}"),
    })?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|err| {
        UpstreamError::Permanent {
            status: None,
            message: format!("bad hex quantity '{raw}': {err}"),
        }
    })
}

/// Price feed over `GET {base}/simple/price`.
pub struct HttpPriceFeed {
    client: Client,
    config: HttpConfig,
}

impl HttpPriceFeed {
    /// Builds the client for `config`.
    pub fn new(config: HttpConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn simple_price(&self, ids: &str, vs_currencies: &str) -> Result<Value, UpstreamError> {
        let url = format!(
            "{}/simple/price",
            self.config.base_url.trim_end_matches('/')
        );
        let mut request = self
            .client
            .get(url)
            .query(&[("ids", ids), ("vs_currencies", vs_currencies)]);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("x-api-key", api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, self.config.timeout))?;
        read_json(response, self.config.max_payload_bytes).await
    }
}

/// Chain explorer over `GET {base}?module=…&action=…&apikey=…`.
pub struct HttpChainExplorer {
    client: Client,
    config: HttpConfig,
}

impl HttpChainExplorer {
    /// Builds the client for `config`.
    pub fn new(config: HttpConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Value, UpstreamError> {
        let mut request = self.client.get(self.config.base_url.as_str()).query(params);
        if let Some(api_key) = &self.config.api_key {
            request = request.query(&[("apikey", api_key.as_str())]);
        }
        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, self.config.timeout))?;
        read_json(response, self.config.max_payload_bytes).await
    }
}

#[async_trait]
impl ChainExplorer for HttpChainExplorer {
    async fn gas_oracle(&self) -> Result<Value, UpstreamError> {
        self.query(&[("module", "gastracker"), ("action", "gasoracle")])
            .await
    }

    async fn address_transactions(&self, address: &str) -> Result<Value, UpstreamError> {
        self.query(&[
            ("module", "account"),
            ("action", "txlist"),
            ("address", address),
        ])
        .await
    }
}

/// JSON-RPC chain node client.
pub struct HttpChainNode {
    client: Client,
    config: HttpConfig,
}

impl HttpChainNode {
    /// Builds the client for `config`.
    pub fn new(config: HttpConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }

    async fn rpc(&self, method: &str) -> Result<Value, UpstreamError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": [],
            "id": 1,
        });
        let response = self
            .client
            .post(self.config.base_url.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(err, self.config.timeout))?;
        let envelope = read_json(response, self.config.max_payload_bytes).await?;
        if let Some(error) = envelope.get("error") {
            return Err(UpstreamError::Permanent {
                status: None,
                message: format!("rpc error: {error}"),
            });
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| UpstreamError::Permanent {
                status: None,
                message: "rpc response missing result".to_string(),
            })
    }
}

#[async_trait]
impl ChainNode for HttpChainNode {
    async fn block_number(&self) -> Result<u64, UpstreamError> {
        let result = self.rpc("eth_blockNumber").await?;
        parse_hex_quantity(&result)
    }

    async fn chain_health(&self) -> Result<Value, UpstreamError> {
        let syncing = self.rpc("eth_syncing").await?;
        Ok(json!({ "syncing": syncing }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = HttpConfig::new("https://api.example.com");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_payload_bytes, 1024 * 1024);
        assert!(config.api_key.is_none());

        let config = config.with_api_key("k");
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn hex_quantities_parse() {
        assert_eq!(parse_hex_quantity(&json!("0x10")).unwrap(), 16);
        assert_eq!(parse_hex_quantity(&json!("0xf4240")).unwrap(), 1_000_000);
        assert!(parse_hex_quantity(&json!("not-hex")).is_err());
        assert!(parse_hex_quantity(&json!(12)).is_err());
    }
}
