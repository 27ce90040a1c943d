//! Core USB library for WH1080/WH3080 class weather stations.
//!
//! This crate talks to the console over its raw memory-read protocol,
//! decodes the fixed settings block and the circular log, and runs the
//! acquisition state machine that keeps the host synchronised with the
//! station's logging and sensor clocks.
//!
//! # Features
//!
//! - **Declarative decoding**: static field tables with nested prefix views
//! - **Stable block reads**: each block is read until two transfers agree
//! - **Clock tracking**: station and sensor clock phase and drift
//! - **Lockup avoidance**: no USB traffic in the seconds around clock events
//! - **Catch-up**: walks the circular log back to the last stored entry
//! - **Retry logic**: bounded backoff, escalating to `DeviceUnavailable`
//! - **Mock station**: in-memory 64 KiB console with failure injection
//!
//! # Supported Stations
//!
//! | Class | Log entry | Extra sensors |
//! |-------|-----------|---------------|
//! | WH1080 | 16 bytes | none |
//! | WH3080 | 20 bytes | illuminance, UV |
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use wslog_core::{Acquisition, AcquisitionConfig, MockStation, StationStatus, SystemClock};
//! use wslog_types::StationType;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wslog_core::Error> {
//!     let mock = MockStation::new(StationType::Wh1080);
//!     let mut acquisition = Acquisition::new(
//!         mock,
//!         StationType::Wh1080,
//!         AcquisitionConfig::default().usb_activity_margin(0.0),
//!         StationStatus::default(),
//!         Arc::new(SystemClock),
//!     );
//!
//!     let cancel = CancellationToken::new();
//!     let logged = acquisition.synchronise(None, &cancel).await?;
//!     println!("caught up with {} entries", logged.len());
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod clock;
pub mod error;
pub mod events;
pub mod fixed;
pub mod format;
pub mod memory;
pub mod mock;
pub mod retry;
pub mod station;
pub mod status;
pub mod transport;
#[cfg(feature = "usb")]
pub mod usb;

// Core exports
pub use acquisition::{Acquisition, AcquisitionConfig, AcquisitionState, SyncQuality};
pub use error::{Error, Result};
pub use station::Station;
pub use transport::StationTransport;

pub use clock::{
    ClockState, DriftMeasurement, DriftingClock, SharedTimeSource, SystemClock, TimeSource,
    TokioClock,
};
pub use events::{AcquisitionEvent, ClockKind, EventReceiver, EventSender, event_channel};
pub use fixed::FixedBlock;
pub use format::{Decoded, FieldDescriptor, FormatTable, Value, fixed_format, reading_format};
pub use memory::Cursor;
pub use mock::MockStation;
pub use retry::{RetryConfig, with_retry};
pub use status::StationStatus;
#[cfg(feature = "usb")]
pub use usb::UsbTransport;

// Re-export from wslog-types
pub use wslog_types::{Reading, Sample, StationType, Status, WindDirection};
