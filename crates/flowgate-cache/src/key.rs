//! Namespaced cache keys.
//!
//! Keys are colon-joined strings of the form `<domain>:<arg1>:<arg2>:…`,
//! case-sensitive and order-stable: two distinct query inputs must produce
//! distinct keys, and argument order is fixed per domain.

use std::fmt;

/// The closed set of cache key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    /// Wallet relationship graphs, keyed by address and depth.
    WalletNetwork,
    /// Paged wallet rankings.
    WalletRankings,
    /// Aggregated dashboard statistics.
    DashboardStats,
    /// Per-address risk scores.
    RiskScore,
    /// Per-chain network statistics.
    NetworkStats,
    /// Raw transaction documents.
    TransactionData,
    /// Prices and gas-tracker data.
    MarketData,
    /// Precomputed popular-wallet listings.
    PopularWallets,
    /// Request-layer sessions.
    Session,
    /// Request-layer rate-limit counters.
    RateLimit,
}

impl CacheDomain {
    /// The namespace prefix used in stored keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheDomain::WalletNetwork => "wallet_network",
            CacheDomain::WalletRankings => "wallet_rankings",
            CacheDomain::DashboardStats => "dashboard_stats",
            CacheDomain::RiskScore => "risk_score",
            CacheDomain::NetworkStats => "network_stats",
            CacheDomain::TransactionData => "transaction_data",
            CacheDomain::MarketData => "market_data",
            CacheDomain::PopularWallets => "popular_wallets",
            CacheDomain::Session => "session",
            CacheDomain::RateLimit => "rate_limit",
        }
    }

    /// Every domain, for configuration enumeration.
    pub const ALL: [CacheDomain; 10] = [
        CacheDomain::WalletNetwork,
        CacheDomain::WalletRankings,
        CacheDomain::DashboardStats,
        CacheDomain::RiskScore,
        CacheDomain::NetworkStats,
        CacheDomain::TransactionData,
        CacheDomain::MarketData,
        CacheDomain::PopularWallets,
        CacheDomain::Session,
        CacheDomain::RateLimit,
    ];
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespaced cache key.
///
/// Built with the argument order fixed by the calling operation; rendering is
/// lossless as long as individual arguments contain no `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    domain: CacheDomain,
    rendered: String,
}

impl CacheKey {
    /// Starts a key in the given namespace.
    pub fn new(domain: CacheDomain) -> Self {
        Self {
            domain,
            rendered: domain.as_str().to_string(),
        }
    }

    /// Appends one argument segment.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.rendered.push(':');
        self.rendered.push_str(&value.to_string());
        self
    }

    /// The namespace this key belongs to.
    pub fn domain(&self) -> CacheDomain {
        self.domain
    }

    /// The stored key string.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// The companion single-flight token key.
    pub fn single_flight(&self) -> String {
        format!("sf:{}", self.rendered)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}
