use flowgate_core::KvError;
use thiserror::Error;

/// Errors from the job queue and scheduler.
#[derive(Debug, Error)]
pub enum JobError {
    /// The shared store failed; workers treat this as transient.
    #[error(transparent)]
    Store(#[from] KvError),

    /// A job record could not be (de)serialized.
    #[error("job record codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// A cron expression did not parse.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// The rejected expression.
        expr: String,
        /// Parser detail.
        reason: String,
    },
}
