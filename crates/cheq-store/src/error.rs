use crate::entity::EntityKind;

/// Errors from entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded as its entity type.
    #[error("corrupt {kind} record {key}: {reason}")]
    CorruptRecord {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    /// A log frame failed its integrity check somewhere other than the tail.
    #[error("corrupt log frame at offset {offset}: {reason}")]
    CorruptFrame { offset: u64, reason: String },

    /// An internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// The backend refused the operation (e.g. connection lost).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
