//! Station data collector.
//!
//! The collector drives one [`Acquisition`] and owns everything its events
//! feed: the raw and summary stores, the summariser and the upload
//! dispatcher.

use std::path::PathBuf;
use std::time::Duration;

use time::PrimitiveDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wslog_core::clock::to_timestamp;
use wslog_core::{
    Acquisition, AcquisitionEvent, SharedTimeSource, StationStatus, StationTransport,
};
use wslog_store::{DataStores, Summariser, SummariserConfig, SummaryReport};

use crate::config::Config;
use crate::dispatch::{DispatchJob, Dispatcher, EventKind, UploadError};

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// The station could not be read or is misconfigured.
    #[error("Station error: {0}")]
    Station(#[from] wslog_core::Error),
    /// Reading or writing the data stores failed.
    #[error("Store error: {0}")]
    Store(#[from] wslog_store::Error),
    /// An upload target could not be created.
    #[error("Upload target setup failed: {0}")]
    Upload(#[from] UploadError),
}

impl CollectorError {
    /// Whether the station stopped responding.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            CollectorError::Station(wslog_core::Error::DeviceUnavailable { .. })
        )
    }
}

/// Result type for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Moves logged data from a station into the stores.
pub struct Collector<T> {
    acquisition: Acquisition<T>,
    stores: DataStores,
    summary_config: SummariserConfig,
    summariser: Summariser,
    dispatcher: Dispatcher,
    status_path: PathBuf,
    time: SharedTimeSource,
    shutdown_deadline: Duration,
    last_hourly: Option<PrimitiveDateTime>,
}

impl<T> std::fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("acquisition", &self.acquisition)
            .field("status_path", &self.status_path)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<T: StationTransport + 'static> Collector<T> {
    /// Open the stores and restore station status for `transport`.
    ///
    /// Upload workers are started immediately, so this must run inside a
    /// tokio runtime.
    pub fn new(config: &Config, transport: T, time: SharedTimeSource) -> Result<Self> {
        let station_type = config
            .station
            .station_type
            .ok_or_else(|| wslog_core::Error::invalid_config("station type is not configured"))?;
        let status_path = config.status_path();
        let status = StationStatus::load(&status_path)?;
        let acquisition = Acquisition::new(
            transport,
            station_type,
            config.station.acquisition_config(),
            status,
            time.clone(),
        );

        info!("Opening data stores in {}", config.storage.data_dir.display());
        let stores = DataStores::open(&config.storage.data_dir, config.storage.store_options())?;
        let dispatcher = Dispatcher::from_config(&config.dispatch)?;
        let summary_config = config.processing.summariser_config();

        Ok(Self {
            acquisition,
            stores,
            summary_config,
            summariser: Summariser::new(summary_config),
            dispatcher,
            status_path,
            time,
            shutdown_deadline: config.dispatch.shutdown_deadline(),
            last_hourly: None,
        })
    }

    /// The underlying acquisition loop.
    pub fn acquisition(&mut self) -> &mut Acquisition<T> {
        &mut self.acquisition
    }

    /// The raw and summary stores.
    pub fn stores(&mut self) -> &mut DataStores {
        &mut self.stores
    }

    /// Catch up with the station, summarise and dispatch, then return.
    pub async fn run_once(&mut self) -> Result<SummaryReport> {
        self.prepare().await?;
        let last_stored = self.stores.raw.last_timestamp();
        let events = self
            .acquisition
            .synchronise(last_stored, &CancellationToken::new())
            .await?;
        let logged = self.handle(events)?;
        info!("Stored {} new reading(s)", logged);
        self.save_status();
        let report = self.summarise()?;
        self.acquisition.stop();
        Ok(report)
    }

    /// Catch up, then follow the station until `cancel` fires.
    ///
    /// A read cycle in progress when `cancel` fires is completed and its
    /// readings stored.
    pub async fn run_live(&mut self, cancel: CancellationToken) -> Result<()> {
        self.prepare().await?;
        let last_stored = self.stores.raw.last_timestamp();
        let initial = match self.acquisition.synchronise(last_stored, &cancel).await {
            Ok(events) => events,
            Err(wslog_core::Error::Cancelled) => {
                self.acquisition.stop();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let logged = self.handle(initial)?;
        info!("Caught up with {} reading(s), following live data", logged);
        self.save_status();
        self.summarise()?;

        while let Some(events) = self.acquisition.poll(&cancel).await? {
            if self.handle(events)? > 0 {
                self.save_status();
                self.summarise()?;
            }
        }

        info!("Live logging stopped");
        self.save_status();
        Ok(())
    }

    /// Flush the stores, save station status and drain upload queues.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            acquisition,
            mut stores,
            dispatcher,
            status_path,
            shutdown_deadline,
            ..
        } = self;
        if let Err(e) = acquisition.status().save(&status_path) {
            warn!("Failed to save station status: {}", e);
        }
        stores.flush()?;
        dispatcher.shutdown(shutdown_deadline).await;
        Ok(())
    }

    /// Check the host clock and settle the pressure offset.
    async fn prepare(&mut self) -> Result<()> {
        if let Some(last) = self.stores.raw.last_timestamp() {
            let now = to_timestamp(self.time.now());
            if now < last {
                return Err(wslog_core::Error::invalid_config(format!(
                    "host clock ({}) is earlier than the last stored reading ({})",
                    now, last
                ))
                .into());
            }
        }

        if self.summary_config.pressure_offset.is_none() {
            let fixed = self.acquisition.fixed_block(false).await?;
            if let Some(offset) = fixed.pressure_offset() {
                info!("Using station pressure offset {:.1} hPa", offset);
                self.summary_config.pressure_offset = Some(offset);
                self.summariser = Summariser::new(self.summary_config);
            }
        }
        Ok(())
    }

    /// Store and forward a batch of events. Returns the number of readings
    /// appended.
    fn handle(&mut self, events: Vec<AcquisitionEvent>) -> Result<usize> {
        let mut stored = 0;
        for event in events {
            match event {
                AcquisitionEvent::Logged { reading, ptr } => {
                    match self.stores.raw.append(reading) {
                        Ok(()) => {
                            stored += 1;
                            self.dispatcher.dispatch(DispatchJob::Logged { reading });
                        }
                        Err(wslog_store::Error::OutOfOrder { last, attempted }) => {
                            error!(
                                "Skipping reading at {} from {:#06x}: not newer than stored {}",
                                attempted, ptr, last
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                AcquisitionEvent::Live { reading, .. } => {
                    self.dispatcher.dispatch(DispatchJob::Live { reading });
                }
                other => debug!("{:?}", other),
            }
        }
        Ok(stored)
    }

    fn save_status(&self) {
        if let Err(e) = self.acquisition.status().save(&self.status_path) {
            warn!("Failed to save station status: {}", e);
        }
    }

    fn summarise(&mut self) -> Result<SummaryReport> {
        let report = self.summariser.process(&mut self.stores)?;
        debug!(
            "Summaries updated: {} hourly, {} daily, {} monthly",
            report.hourly, report.daily, report.monthly
        );
        self.dispatch_hourly()?;
        Ok(report)
    }

    /// Send the newest complete hourly summary if it has not been sent.
    fn dispatch_hourly(&mut self) -> Result<()> {
        if !self.dispatcher.wants(EventKind::Hourly) {
            return Ok(());
        }
        let Some(last_raw) = self.stores.raw.last_timestamp() else {
            return Ok(());
        };
        let complete = self
            .stores
            .hourly
            .nearest_before(last_raw + time::Duration::seconds(1))?;
        if let Some(summary) = complete
            && self.last_hourly.is_none_or(|sent| summary.idx > sent)
        {
            self.last_hourly = Some(summary.idx);
            self.dispatcher.dispatch(DispatchJob::Hourly { summary });
        }
        Ok(())
    }
}
