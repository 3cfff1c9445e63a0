//! Error types for portal operations

/// Errors from portal operations.
///
/// `AuthExpired` is the only variant that triggers the engine's refresh
/// path; everything else is reported or retried on a later cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session token rejected or expired")]
    AuthExpired,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("portal error: {0}")]
    Portal(String),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for portal operations.
pub type Result<T> = std::result::Result<T, Error>;
