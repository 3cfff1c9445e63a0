//! Error types for engine operations

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a check is already in progress")]
    CheckInProgress,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("state store error: {0}")]
    Store(String),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
