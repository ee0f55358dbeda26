use thiserror::Error;

/// Errors from the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// No bucket is registered under this name.
    #[error("no rate bucket registered for upstream '{name}'")]
    UnknownUpstream {
        /// The requested bucket name.
        name: String,
    },

    /// The caller's context was cancelled while waiting for the gap.
    #[error("rate-limit wait cancelled")]
    Cancelled,
}
