/// Errors produced while reading or validating events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The line is not a JSON object of the expected envelope shape.
    #[error("malformed event JSON: {0}")]
    Json(String),

    /// The `kind` field names no known event.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// A required field is absent.
    #[error("{kind}: missing field `{field}`")]
    MissingField { kind: String, field: String },

    /// A field is present but cannot be interpreted.
    #[error("{kind}: invalid field `{field}`: {reason}")]
    InvalidField {
        kind: String,
        field: String,
        reason: String,
    },

    /// The line is not valid UTF-8.
    #[error("event line is not valid UTF-8: {0}")]
    Encoding(String),

    /// The event source could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the events crate.
pub type Result<T> = std::result::Result<T, EventError>;
