//! Shared error types.

use thiserror::Error;

/// Result type alias for shared infrastructure operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared infrastructure (logging, environment plumbing).
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("logging error: {0}")]
    Logging(String),
}
