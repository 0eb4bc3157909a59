use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeneBatchError {
    #[error("invalid gene id: {0:?}")]
    InvalidGeneId(String),

    #[error("invalid strand: {0:?}")]
    InvalidStrand(String),

    #[error("invalid assembly: {0}")]
    InvalidAssembly(String),

    #[error("feature table not found at {0}")]
    #[diagnostic(help("pass --feature-table or set feature_table in genebatch.json"))]
    MissingFeatureTable(PathBuf),

    #[error("failed to read feature table {path}: {message}")]
    FeatureTableRead { path: PathBuf, message: String },

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("remote service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("{label}: giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        label: String,
        attempts: usize,
        last: Box<GeneBatchError>,
    },

    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GeneBatchError {
    /// Timeouts, connection failures and throttling/server statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            GeneBatchError::Http(_) | GeneBatchError::Translation(_) => true,
            GeneBatchError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Errors that abort a whole batch before any per-gene work starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GeneBatchError::MissingFeatureTable(_)
                | GeneBatchError::FeatureTableRead { .. }
                | GeneBatchError::InvalidConcurrency(_)
                | GeneBatchError::WorkerPool(_)
                | GeneBatchError::ConfigRead(_)
                | GeneBatchError::ConfigParse(_)
        )
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
