//! Flat-file persistence and summaries for weather station readings.
//!
//! This crate stores readings as date-partitioned CSV files that stay
//! readable with line-oriented tools, and derives hourly, daily and
//! monthly summaries from them.
//!
//! # Features
//!
//! - Append-only raw store, one file per day
//! - Bounded LRU cache of loaded partitions
//! - Lazy, restartable range slices across partitions
//! - Incremental summaries with configurable day-end hour
//! - Rain counter reset and jump handling
//! - Atomic partition rewrites for truncation and bulk import
//!
//! # Layout
//!
//! ```text
//! data/
//!   raw/2024/2024-05/2024-05-01.txt
//!   hourly/2024/2024-05/2024-05-01.txt
//!   daily/2024/2024-05-01.txt
//!   monthly/2024-01-01.txt
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wslog_store::{DataStores, StoreOptions, Summariser, SummariserConfig};
//!
//! let mut stores = DataStores::open(wslog_store::default_data_dir(), StoreOptions::default())?;
//! let summariser = Summariser::new(SummariserConfig::default());
//! let report = summariser.process(&mut stores)?;
//! println!("{} hourly summaries updated", report.hourly);
//!
//! for summary in stores.daily.slice(None, None) {
//!     let summary = summary?;
//!     println!("{} rain {} mm", summary.start, summary.rain);
//! }
//! # Ok::<(), wslog_store::Error>(())
//! ```

mod error;
mod partition;
mod record;
mod store;
mod summariser;
mod summary;
mod window;

pub use error::{Error, Result};
pub use partition::{Partition, PartitionCache, Partitioning};
pub use record::{Record, RowReader, RowWriter, format_timestamp};
pub use store::{FlushMode, ImportResult, Slice, StoreOptions, TimeSeriesStore};
pub use summariser::{CounterReset, DataStores, Summariser, SummariserConfig, SummaryReport};
pub use summary::{Field, FieldStats, MonthlyRecord, SummaryFields, SummaryRecord};
pub use window::{Period, Window, WindowSpec};

/// Default data directory following platform conventions.
///
/// - Linux: `~/.local/share/wslog`
/// - macOS: `~/Library/Application Support/wslog`
/// - Windows: `C:\Users\<user>\AppData\Local\wslog`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("wslog")
}
