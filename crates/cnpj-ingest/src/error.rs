//! Error taxonomy for an ingestion run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised across the ingestion pipeline.
///
/// Catalog failures abort the run (there is nothing to process without a
/// resolved snapshot); fetch and ingest failures are isolated per archive
/// and reported without stopping the rest of the batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("no snapshot folder found in listing of {0}")]
    NoSnapshotFound(String),

    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("malformed archive {}: expected exactly one inner entry, found {}", .path.display(), .entries)]
    MalformedArchive { path: PathBuf, entries: usize },

    #[error("schema type mismatch in {archive} at row {row}: {detail}")]
    SchemaTypeMismatch {
        archive: String,
        row: u64,
        detail: String,
    },

    #[error("unsupported primitive type: {0}")]
    UnsupportedPrimitive(String),

    #[error("no schema registered for prefix {0}")]
    UnknownPrefix(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        IngestError::Config(err.to_string())
    }
}
