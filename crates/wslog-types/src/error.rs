//! Error types for data parsing in wslog-types.

use thiserror::Error;

/// Errors that can occur when interpreting weather station data.
///
/// This error type is transport-agnostic and does not include
/// USB errors (those belong in wslog-core).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A value could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Buffer too short for the requested layout.
    #[error("Insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Bytes required by the layout.
        expected: usize,
        /// Bytes actually supplied.
        actual: usize,
    },

    /// Station class name not recognised.
    #[error("Unknown station type: {0}")]
    UnknownStationType(String),
}

/// Result type alias using wslog-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
