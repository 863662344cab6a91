use cheq_events::EventError;
use cheq_store::StoreError;

/// Errors produced by the projection engine.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event source error: {0}")]
    Source(#[from] EventError),

    /// Storage kept failing past the retry budget. The cursor was not
    /// advanced past the failed event.
    #[error("storage unavailable after {attempts} attempt(s): {source}")]
    StorageUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProjectionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;
