//! Deterministic fallback constants.
//!
//! Served when an operation exhausts its retries and no stale entry exists.
//! Values are conservative on purpose: a zero price and slow-lane gas
//! readings rather than optimistic guesses.

use serde_json::{json, Value};

/// Per-operation fallback constants, configurable with compiled-in defaults.
#[derive(Debug, Clone)]
pub struct FallbackTable {
    price: Value,
    gas_tracker: Value,
}

impl FallbackTable {
    /// Replaces the price fallback.
    pub fn with_price(mut self, value: Value) -> Self {
        self.price = value;
        self
    }

    /// Replaces the gas-tracker fallback.
    pub fn with_gas_tracker(mut self, value: Value) -> Self {
        self.gas_tracker = value;
        self
    }

    /// The price fallback payload.
    pub fn price(&self) -> Value {
        self.price.clone()
    }

    /// The gas-tracker fallback payload.
    pub fn gas_tracker(&self) -> Value {
        self.gas_tracker.clone()
    }
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self {
            price: json!({ "usd": 0.0 }),
            gas_tracker: json!({
                "SafeGasPrice": "0",
                "ProposeGasPrice": "0",
                "FastGasPrice": "0",
            }),
        }
    }
}
