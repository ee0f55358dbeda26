//! Epoch-millisecond time helpers.
//!
//! Records that cross the shared store (cache envelopes, job timestamps) are
//! stamped with wall-clock epoch milliseconds so they stay meaningful across
//! process restarts.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
