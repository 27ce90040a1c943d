//! Error types for wslog-store.

use std::path::PathBuf;

use time::PrimitiveDateTime;

/// Result type for wslog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in wslog-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An append did not advance past the last stored timestamp.
    #[error("Out of order append: {attempted} is not after last stored record {last}")]
    OutOfOrder {
        /// Timestamp of the newest record already stored.
        last: PrimitiveDateTime,
        /// Timestamp that was rejected.
        attempted: PrimitiveDateTime,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a partition directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A stored row could not be interpreted.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
