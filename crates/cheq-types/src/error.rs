use thiserror::Error;

/// Errors produced while parsing foundation types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("unknown key format: {0}")]
    UnknownKeyFormat(String),
}
