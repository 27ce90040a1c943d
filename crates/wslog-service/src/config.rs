//! Service configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wslog_core::{AcquisitionConfig, RetryConfig, SyncQuality};
use wslog_store::{FlushMode, StoreOptions, SummariserConfig};
use wslog_types::StationType;

use crate::dispatch::EventKind;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Station settings.
    pub station: StationConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Summary settings.
    pub processing: ProcessingConfig,
    /// Upload targets.
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// This checks:
    /// - The station type is set
    /// - The USB activity margin is 0.5 to 10 seconds
    /// - The data directory is not empty and the partition cache holds at least one partition
    /// - The day end hour is 0 to 24 and the UTC offset is within 14 hours
    /// - Upload targets have unique names and the location their kind needs
    ///
    /// # Example
    ///
    /// ```
    /// use wslog_service::Config;
    /// use wslog_types::StationType;
    ///
    /// let mut config = Config::default();
    /// assert!(config.validate().is_err());
    ///
    /// config.station.station_type = Some(StationType::Wh1080);
    /// config.validate().expect("a station type is all a default config needs");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.station.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.processing.validate());
        errors.extend(self.dispatch.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the persisted station status.
    pub fn status_path(&self) -> PathBuf {
        self.storage.data_dir.join("status.json")
    }
}

/// Station settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Station class (`"1080"` or `"3080"`). Required.
    pub station_type: Option<StationType>,
    /// Seconds either side of a clock event kept free of USB traffic.
    pub usb_activity_margin: f64,
    /// Synchronisation quality.
    pub sync: SyncQuality,
    /// Retries for each device read before giving up.
    pub max_retries: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_type: None,
            usb_activity_margin: 3.0,
            sync: SyncQuality::Fast,
            max_retries: 3,
        }
    }
}

/// Accepted range for `station.usb_activity_margin`.
const MARGIN_RANGE: std::ops::RangeInclusive<f64> = 0.5..=10.0;

impl StationConfig {
    /// Validate station configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.station_type.is_none() {
            errors.push(ValidationError::new(
                "station.station_type",
                "station type is required (\"1080\" or \"3080\")",
            ));
        }

        if !MARGIN_RANGE.contains(&self.usb_activity_margin) {
            errors.push(ValidationError::new(
                "station.usb_activity_margin",
                format!(
                    "margin {} is out of range ({} to {} seconds)",
                    self.usb_activity_margin,
                    MARGIN_RANGE.start(),
                    MARGIN_RANGE.end(),
                ),
            ));
        }

        errors
    }

    /// Acquisition tuning derived from these settings.
    pub fn acquisition_config(&self) -> AcquisitionConfig {
        AcquisitionConfig::default()
            .usb_activity_margin(self.usb_activity_margin)
            .sync(self.sync)
            .retry(RetryConfig::new(self.max_retries))
    }
}

/// When appended rows reach the disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushSetting {
    /// Sync after every append.
    #[default]
    Always,
    /// Buffer appends for `flush_interval_secs`.
    Periodic,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the raw and summary stores.
    pub data_dir: PathBuf,
    /// Write durability.
    pub flush: FlushSetting,
    /// Longest time buffered appends stay in memory.
    pub flush_interval_secs: u64,
    /// Number of partitions each store keeps loaded.
    pub cache_partitions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: wslog_store::default_data_dir(),
            flush: FlushSetting::Always,
            flush_interval_secs: 300,
            cache_partitions: 2,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new("storage.data_dir", "data directory cannot be empty"));
        }

        if self.cache_partitions == 0 {
            errors.push(ValidationError::new(
                "storage.cache_partitions",
                "at least one partition must be cached",
            ));
        }

        if self.flush == FlushSetting::Periodic && self.flush_interval_secs == 0 {
            errors.push(ValidationError::new(
                "storage.flush_interval_secs",
                "periodic flushing needs a non-zero interval",
            ));
        }

        errors
    }

    /// Store options derived from these settings.
    pub fn store_options(&self) -> StoreOptions {
        let flush = match self.flush {
            FlushSetting::Always => FlushMode::Always,
            FlushSetting::Periodic => {
                FlushMode::Periodic(Duration::from_secs(self.flush_interval_secs))
            }
        };
        StoreOptions::default()
            .cache_partitions(self.cache_partitions)
            .flush(flush)
    }
}

/// Summary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Local hour at which the meteorological day ends (24 means midnight).
    pub day_end_hour: u8,
    /// Daily rainfall above which a day counts as a rain day, in mm.
    pub rain_day_threshold: f64,
    /// Local winter time minus UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Relative minus absolute pressure in hPa. Read from the station when unset.
    pub pressure_offset: Option<f64>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            day_end_hour: 9,
            rain_day_threshold: 0.2,
            utc_offset_minutes: 0,
            pressure_offset: None,
        }
    }
}

/// Largest accepted UTC offset.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

impl ProcessingConfig {
    /// Validate processing configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.day_end_hour > 24 {
            errors.push(ValidationError::new(
                "processing.day_end_hour",
                format!("hour {} is out of range (0 to 24)", self.day_end_hour),
            ));
        }

        if self.rain_day_threshold.is_nan() || self.rain_day_threshold < 0.0 {
            errors.push(ValidationError::new(
                "processing.rain_day_threshold",
                format!(
                    "threshold {} must be a non-negative number of mm",
                    self.rain_day_threshold,
                ),
            ));
        }

        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            errors.push(ValidationError::new(
                "processing.utc_offset_minutes",
                format!(
                    "offset {} is out of range (-{} to {} minutes)",
                    self.utc_offset_minutes,
                    MAX_UTC_OFFSET_MINUTES,
                    MAX_UTC_OFFSET_MINUTES,
                ),
            ));
        }

        errors
    }

    /// Summariser settings derived from these settings.
    pub fn summariser_config(&self) -> SummariserConfig {
        SummariserConfig {
            day_end_hour: self.day_end_hour % 24,
            rain_day_threshold: self.rain_day_threshold,
            utc_offset: time::Duration::minutes(i64::from(self.utc_offset_minutes)),
            pressure_offset: self.pressure_offset,
        }
    }
}

/// Upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds allowed for pending uploads at shutdown.
    pub shutdown_deadline_secs: u64,
    /// Jobs queued per target before new ones are dropped.
    pub queue_depth: usize,
    /// Failed jobs kept per target for the next attempt.
    pub backlog: usize,
    /// Upload targets.
    pub targets: Vec<TargetConfig>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shutdown_deadline_secs: 30,
            queue_depth: 64,
            backlog: 50,
            targets: Vec::new(),
        }
    }
}

impl DispatchConfig {
    /// Validate dispatch configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.queue_depth == 0 {
            errors.push(ValidationError::new(
                "dispatch.queue_depth",
                "queue depth must be at least 1",
            ));
        }

        let mut seen = HashSet::new();
        for (i, target) in self.targets.iter().enumerate() {
            let prefix = format!("dispatch.targets[{}]", i);
            errors.extend(target.validate(&prefix));
            if !target.name.is_empty() && !seen.insert(target.name.as_str()) {
                errors.push(ValidationError::new(
                    format!("{}.name", prefix),
                    format!("duplicate target name '{}'", target.name),
                ));
            }
        }

        errors
    }

    /// Shutdown deadline as a duration.
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

/// Kind of upload target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Local file.
    File,
    /// HTTP endpoint receiving JSON POSTs.
    Http,
}

/// How a file target is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Replace the file with the latest record.
    #[default]
    Latest,
    /// Append one JSON document per line.
    Lines,
}

/// One upload target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Name used in logs.
    pub name: String,
    /// Target kind.
    pub kind: TargetKind,
    /// Output file for `file` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Endpoint for `http` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// File layout for `file` targets.
    #[serde(default)]
    pub format: FileFormat,
    /// Events sent to this target.
    #[serde(default = "default_events")]
    pub events: Vec<EventKind>,
}

fn default_events() -> Vec<EventKind> {
    vec![EventKind::Logged]
}

impl TargetConfig {
    /// Validate one target.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                "target name cannot be empty",
            ));
        }

        match self.kind {
            TargetKind::File => {
                if self.path.as_ref().is_none_or(|p| p.as_os_str().is_empty()) {
                    errors.push(ValidationError::new(
                        format!("{}.path", prefix),
                        "file targets need a path",
                    ));
                }
            }
            TargetKind::Http => match &self.url {
                None => errors.push(ValidationError::new(
                    format!("{}.url", prefix),
                    "http targets need a url",
                )),
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    errors.push(ValidationError::new(
                        format!("{}.url", prefix),
                        format!("url '{}' must start with http:// or https://", url),
                    ))
                }
                Some(_) => {}
            },
        }

        if self.events.is_empty() {
            errors.push(ValidationError::new(
                format!("{}.events", prefix),
                "at least one event kind is required",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `station.station_type` or `dispatch.targets[0].url`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wslog")
        .join("wslog.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.station.station_type = Some(StationType::Wh1080);
        config
    }

    fn fields(config: &Config) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected error {other}"),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.station.station_type, None);
        assert_eq!(config.station.usb_activity_margin, 3.0);
        assert_eq!(config.station.sync, SyncQuality::Fast);
        assert_eq!(config.storage.cache_partitions, 2);
        assert_eq!(config.storage.data_dir, wslog_store::default_data_dir());
        assert_eq!(config.processing.day_end_hour, 9);
        assert_eq!(config.dispatch.queue_depth, 64);
        assert!(config.dispatch.targets.is_empty());
    }

    #[test]
    fn test_missing_station_type_is_rejected() {
        assert_eq!(fields(&Config::default()), vec!["station.station_type"]);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [station]
            station_type = "3080"
            usb_activity_margin = 4.5
            sync = "precise"

            [storage]
            data_dir = "/var/lib/wslog"
            flush = "periodic"
            flush_interval_secs = 60

            [processing]
            day_end_hour = 21
            utc_offset_minutes = -300
            pressure_offset = 10.4

            [[dispatch.targets]]
            name = "latest"
            kind = "file"
            path = "/tmp/latest.json"
            events = ["live", "hourly"]

            [[dispatch.targets]]
            name = "remote"
            kind = "http"
            url = "https://example.org/ingest"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.station.station_type, Some(StationType::Wh3080));
        assert_eq!(config.station.sync, SyncQuality::Precise);
        assert_eq!(config.station.max_retries, 3);
        assert_eq!(config.storage.flush, FlushSetting::Periodic);
        assert_eq!(config.storage.cache_partitions, 2);
        assert_eq!(config.processing.rain_day_threshold, 0.2);
        assert_eq!(config.dispatch.targets.len(), 2);
        assert_eq!(
            config.dispatch.targets[0].events,
            vec![EventKind::Live, EventKind::Hourly]
        );
        assert_eq!(config.dispatch.targets[1].events, vec![EventKind::Logged]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("wslog.toml");

        let mut config = valid();
        config.processing.pressure_offset = Some(9.8);
        config.dispatch.targets.push(TargetConfig {
            name: "jsonl".to_string(),
            kind: TargetKind::File,
            path: Some(PathBuf::from("/tmp/readings.jsonl")),
            url: None,
            format: FileFormat::Lines,
            events: vec![EventKind::Logged],
        });
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded.station.station_type, Some(StationType::Wh1080));
        assert_eq!(loaded.processing.pressure_offset, Some(9.8));
        assert_eq!(loaded.dispatch.targets[0].format, FileFormat::Lines);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("/nonexistent/path/wslog.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[station\nstation_type = 1080").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_out_of_range_values_are_all_reported() {
        let mut config = valid();
        config.station.usb_activity_margin = 0.1;
        config.storage.cache_partitions = 0;
        config.processing.day_end_hour = 25;
        config.processing.rain_day_threshold = -1.0;
        config.processing.utc_offset_minutes = 15 * 60;
        assert_eq!(
            fields(&config),
            vec![
                "station.usb_activity_margin",
                "storage.cache_partitions",
                "processing.day_end_hour",
                "processing.rain_day_threshold",
                "processing.utc_offset_minutes",
            ]
        );
    }

    #[test]
    fn test_target_validation() {
        let mut config = valid();
        let target = |name: &str, kind, url: Option<&str>| TargetConfig {
            name: name.to_string(),
            kind,
            path: None,
            url: url.map(String::from),
            format: FileFormat::Latest,
            events: default_events(),
        };
        config.dispatch.targets = vec![
            target("a", TargetKind::File, None),
            target("b", TargetKind::Http, Some("ftp://example.org")),
            target("b", TargetKind::Http, Some("http://example.org")),
        ];
        assert_eq!(
            fields(&config),
            vec![
                "dispatch.targets[0].path",
                "dispatch.targets[1].url",
                "dispatch.targets[2].name",
            ]
        );
    }

    #[test]
    fn test_day_end_hour_24_means_midnight() {
        let mut config = valid();
        config.processing.day_end_hour = 24;
        config.processing.utc_offset_minutes = 60;
        assert!(config.validate().is_ok());
        let summariser = config.processing.summariser_config();
        assert_eq!(summariser.day_end_hour, 0);
        assert_eq!(summariser.utc_offset, time::Duration::hours(1));
    }

    #[test]
    fn test_store_options_follow_flush_setting() {
        let mut storage = StorageConfig::default();
        assert_eq!(storage.store_options().flush, FlushMode::Always);
        storage.flush = FlushSetting::Periodic;
        storage.flush_interval_secs = 120;
        storage.cache_partitions = 3;
        let options = storage.store_options();
        assert_eq!(options.flush, FlushMode::Periodic(Duration::from_secs(120)));
        assert_eq!(options.cache_partitions, 3);
    }

    #[test]
    fn test_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError::new("station.station_type", "station type is required"),
            ValidationError::new("dispatch.targets[0].url", "http targets need a url"),
        ]);
        let display = format!("{}", error);
        assert!(display.contains("station.station_type"));
        assert!(display.contains("dispatch.targets[0].url"));
    }
}
