//! Error taxonomy for the census engine.
//!
//! Job-level failures (`Transport`, `Timeout`, `MalformedPayload`) never leave
//! the job runner as errors: they are recorded as failure markers in the
//! result map. Everything else is fatal to the request that raised it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CensusError>;

#[derive(Debug, Error)]
pub enum CensusError {
    /// Network error or non-2xx response from the remote service.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single job exceeded its own timeout.
    #[error("job timed out after {0}s")]
    Timeout(u64),

    /// The response body did not have the shape the job asked for.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A job the caller depends on is absent from the result map or failed.
    #[error("required result '{job}' is missing: {reason}")]
    MissingRequiredResult { job: String, reason: String },

    /// A record lacks a field the classifier needs. Skipped, never fatal.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Invalid configuration (e.g. a negative run interval).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown source '{name}' (available: {available})")]
    UnknownSource { name: String, available: String },

    /// The whole batch overran the outer request deadline.
    #[error("request deadline of {0}s exceeded")]
    DeadlineExceeded(u64),
}

impl CensusError {
    pub fn missing(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingRequiredResult {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Errors that a job runner turns into a failure marker instead of
    /// propagating.
    pub fn is_job_local(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::MalformedPayload(_)
        )
    }
}
