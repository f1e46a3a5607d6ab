//! Error taxonomy shared across the pipeline

use thiserror::Error;

/// Result type alias for verdict operations
pub type Result<T> = std::result::Result<T, VerdictError>;

/// Failure modes of the scatter/gather pipeline
///
/// Worker-local failures (`InsufficientData`, `Upstream`) are normally
/// converted into `decision: ERROR` result messages so the aggregator's
/// count-based resolution is never stalled; they only surface as errors when
/// no correlation id is available to answer to.
#[derive(Debug, Error)]
pub enum VerdictError {
    /// Request rejected before any dispatch; no broker interaction happened
    #[error("invalid request: {0}")]
    Validation(String),

    /// A strategy cannot compute with the available price series
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A collaborator call (market data, sentiment model) failed
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The aggregation deadline elapsed before the expected result count
    #[error("timed out waiting for strategy results ({correlation_id})")]
    Timeout { correlation_id: uuid::Uuid },

    /// Broker connection or delivery failure; fatal to the owning process
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed wire payload
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl VerdictError {
    /// Whether the owning process should exit rather than keep consuming.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
