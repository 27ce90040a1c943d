//! Error types for wslog-core.
//!
//! This module defines all error types that can occur when talking to a
//! weather station over USB and decoding its memory.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::DeviceIo`] | Retry with backoff and lockup pacing | USB timeouts and busy endpoints are usually transient |
//! | [`Error::Decode`] | Pause, then re-read | Block was read while the station was writing it |
//! | [`Error::DeviceUnavailable`] | Stop the run | Retries exhausted, station probably needs a power cycle |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//! | [`Error::Cancelled`] | Do not retry | Shutdown was requested |
//!
//! ## Error Classification
//!
//! [`Error::is_retryable`] returns `true` for [`Error::DeviceIo`] and
//! [`Error::Decode`]. The acquisition loop retries those locally using
//! [`crate::RetryConfig`] and only surfaces [`Error::DeviceUnavailable`]
//! once the retry budget is spent.

use thiserror::Error;

/// Errors that can occur when communicating with a weather station.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// USB transport failure (timeout, busy, short transfer).
    #[error("Device IO error during {operation}: {message}")]
    DeviceIo {
        /// The transport operation that failed.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// Block contents could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Retries exhausted; the station is not responding.
    #[error("Device unavailable: {operation} failed after {attempts} attempts: {source}")]
    DeviceUnavailable {
        /// The operation that was being retried.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The last error seen.
        #[source]
        source: Box<Error>,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error (status file access).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Status file serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a transport error for an operation.
    pub fn device_io(operation: &'static str, message: impl Into<String>) -> Self {
        Self::DeviceIo {
            operation,
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error is recovered by retrying the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DeviceIo { .. } | Error::Decode(_))
    }
}

impl From<wslog_types::ParseError> for Error {
    fn from(err: wslog_types::ParseError) -> Self {
        match err {
            wslog_types::ParseError::InsufficientBytes { expected, actual } => Error::Decode(
                format!("expected {} bytes, got {}", expected, actual),
            ),
            wslog_types::ParseError::UnknownStationType(name) => {
                Error::InvalidConfig(format!("unknown station type '{}'", name))
            }
            _ => Error::Decode(format!("Parse error: {}", err)),
        }
    }
}

/// Result type alias using wslog-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
