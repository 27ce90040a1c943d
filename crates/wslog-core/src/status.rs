//! Persisted synchronisation state.
//!
//! Restarting the collector should not cost a full re-read of the fixed
//! block or a day of clock re-measurement, so the acquisition state is
//! saved as JSON next to the data store after every logged entry.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::ClockState;
use crate::error::Result;
use crate::fixed::FixedBlock;
use crate::memory::Cursor;

/// Synchronisation state that survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationStatus {
    /// Last fixed block read from the station.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_block: Option<FixedBlock>,
    /// Logging clock phase and drift.
    #[serde(default)]
    pub station_clock: ClockState,
    /// Sensor clock phase and drift.
    #[serde(default)]
    pub sensor_clock: ClockState,
    /// Last synchronised log entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl StationStatus {
    /// Load status from `path`.
    ///
    /// A missing file yields the default status. A corrupt file is logged
    /// and also replaced by the default, since everything in it can be
    /// re-measured.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no status file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&text) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!("ignoring unreadable status file {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Save status to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
