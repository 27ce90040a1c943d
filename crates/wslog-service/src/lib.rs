//! Logging service for USB weather stations.
//!
//! This crate provides the `wslog` service that:
//! - Catches up with the station's log and follows it live
//! - Appends readings to the flat-file raw store
//! - Keeps hourly, daily and monthly summaries up to date
//! - Forwards live readings, logged readings and hourly summaries to upload targets
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/wslog/wslog.toml`:
//!
//! ```toml
//! [station]
//! station_type = "1080"
//! usb_activity_margin = 3.0
//! sync = "fast"
//!
//! [storage]
//! data_dir = "~/.local/share/wslog"
//! flush = "always"
//!
//! [processing]
//! day_end_hour = 9
//! rain_day_threshold = 0.2
//! utc_offset_minutes = 0
//!
//! [dispatch]
//! shutdown_deadline_secs = 30
//!
//! [[dispatch.targets]]
//! name = "latest"
//! kind = "file"
//! path = "/var/www/weather/latest.json"
//! events = ["logged"]
//!
//! [[dispatch.targets]]
//! name = "archive"
//! kind = "http"
//! url = "https://weather.example.org/ingest"
//! events = ["hourly"]
//! ```

pub mod collector;
pub mod config;
pub mod dispatch;
pub mod simulator;

pub use collector::{Collector, CollectorError};
pub use config::{
    Config, ConfigError, DispatchConfig, FileFormat, FlushSetting, ProcessingConfig,
    StationConfig, StorageConfig, TargetConfig, TargetKind, ValidationError, default_config_path,
};
pub use dispatch::{
    DispatchJob, Dispatcher, EventKind, FileUploader, HttpUploader, UploadError, Uploader,
};
