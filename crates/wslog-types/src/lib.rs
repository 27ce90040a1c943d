//! Platform-agnostic types for USB weather station data.
//!
//! This crate provides the value types shared by the device layer
//! (wslog-core), the flat-file store (wslog-store) and the service.
//!
//! # Features
//!
//! - Station classes and their log record sizes
//! - Decoded log entries ([`Sample`]) and timestamped [`Reading`]s
//! - Status bits and compass wind directions
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use wslog_types::{StationType, WindDirection};
//!
//! let station: StationType = "3080".parse().unwrap();
//! assert_eq!(station.reading_len(), 20);
//! assert_eq!(WindDirection::new(4).unwrap().label(), "E");
//! ```

pub mod error;
#[cfg(feature = "serde")]
pub mod timestamp;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{Reading, Sample, StationType, Status, WindDirection};

/// Timestamp format used in logs and stored records (UTC, second resolution).
pub const TIMESTAMP_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
