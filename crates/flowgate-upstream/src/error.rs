use std::time::Duration;
use thiserror::Error;

/// Upstream failure taxonomy.
///
/// The retryable kinds (rate-limited, transient, timeout) are handled inside
/// the gateway with backoff, stale-serve and fallback constants; only
/// permanent failures and exhausted-with-no-stale errors reach the caller.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The upstream answered 429, or local back-pressure was observed.
    #[error("upstream rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Server-provided retry hint, if any.
        retry_after: Option<Duration>,
    },

    /// 5xx, connection reset, or other transient transport failure.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The call exceeded the request timeout.
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// Non-429 4xx or a malformed payload. Not retried, never cached.
    #[error("permanent upstream failure (status {status:?}): {message}")]
    Permanent {
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
        /// Human-readable detail.
        message: String,
    },

    /// The response body exceeds the configured cap. Rejected at source,
    /// never cached.
    #[error("payload of {size} bytes exceeds the {limit} byte cap")]
    PayloadTooLarge {
        /// Observed payload size.
        size: usize,
        /// Configured cap.
        limit: usize,
    },

    /// The caller's context was cancelled mid-call.
    #[error("upstream call cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Whether the gateway should retry this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RateLimited { .. }
                | UpstreamError::Transient(_)
                | UpstreamError::Timeout(_)
        )
    }

    /// Maps an HTTP status into the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            429 => UpstreamError::RateLimited { retry_after: None },
            500..=599 => UpstreamError::Transient(format!("status {status}: {}", message.into())),
            _ => UpstreamError::Permanent {
                status: Some(status),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(UpstreamError::RateLimited { retry_after: None }.is_retryable());
        assert!(UpstreamError::Transient("reset".into()).is_retryable());
        assert!(UpstreamError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(!UpstreamError::Permanent {
            status: Some(404),
            message: "not found".into()
        }
        .is_retryable());
        assert!(!UpstreamError::Cancelled.is_retryable());
        assert!(!UpstreamError::PayloadTooLarge { size: 2, limit: 1 }.is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            UpstreamError::from_status(429, ""),
            UpstreamError::RateLimited { .. }
        ));
        assert!(matches!(
            UpstreamError::from_status(503, "unavailable"),
            UpstreamError::Transient(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(404, "missing"),
            UpstreamError::Permanent {
                status: Some(404),
                ..
            }
        ));
    }
}
