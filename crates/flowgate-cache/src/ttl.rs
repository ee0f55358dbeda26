//! Per-domain freshness policy.

use crate::key::CacheDomain;
use std::collections::HashMap;
use std::time::Duration;

/// Per-domain fresh-TTL overrides layered over operation defaults.
///
/// Operations carry their own default fresh TTL (price 300 s, gas tracker
/// 180 s, …); an override for the operation's domain, typically sourced from
/// `CACHE_TTL_<DOMAIN>`, wins over the default. The hard TTL is derived as
/// twice the fresh TTL everywhere.
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    overrides: HashMap<CacheDomain, Duration>,
}

impl TtlPolicy {
    /// A policy with no overrides; every operation uses its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fresh TTL for every key in `domain`.
    pub fn with_override(mut self, domain: CacheDomain, fresh: Duration) -> Self {
        self.overrides.insert(domain, fresh);
        self
    }

    /// Resolves the fresh TTL for an operation caching under `domain`.
    pub fn fresh_ttl(&self, domain: CacheDomain, op_default: Duration) -> Duration {
        self.overrides.get(&domain).copied().unwrap_or(op_default)
    }

    /// Resolves the hard TTL: twice the fresh TTL.
    pub fn hard_ttl(&self, domain: CacheDomain, op_default: Duration) -> Duration {
        self.fresh_ttl(domain, op_default) * 2
    }
}
