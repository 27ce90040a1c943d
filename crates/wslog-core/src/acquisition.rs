//! Acquisition state machine.
//!
//! [`Acquisition`] keeps the host in step with the console. It learns the
//! phase of the station's logging clock and the sensor broadcast clock
//! from observed changes, sleeps until just before the next expected
//! event, and keeps USB traffic out of the few seconds around each event.
//!
//! # States
//!
//! ```text
//! Idle -> Synchronizing -> Polling <-> LockedOut
//!            any state -> Stopped
//! ```
//!
//! Each call to [`Acquisition::poll`] sleeps (cancellably) and then runs one
//! read cycle to completion, so a stop request never interrupts a block
//! read or leaves a half-delivered batch of events.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wslog_types::{Sample, Status, StationType};

use crate::clock::{DriftingClock, SharedTimeSource, to_timestamp};
use crate::error::{Error, Result};
use crate::events::{AcquisitionEvent, ClockKind, EventSender};
use crate::fixed::FixedBlock;
use crate::memory::{Cursor, dec_ptr, pointer_distance};
use crate::retry::{RetryConfig, with_retry};
use crate::station::Station;
use crate::status::StationStatus;
use crate::transport::StationTransport;

/// Shortest sleep between polls, in seconds.
pub const MIN_PAUSE: f64 = 0.5;
/// Tolerance when deciding whether an observed change coincides with a
/// clock event, in seconds.
pub const EVENT_MARGIN: f64 = MIN_PAUSE * 2.0 - 0.1;
/// Interval between sensor broadcasts, in seconds.
const LIVE_INTERVAL: f64 = 48.0;
/// Grace period after a missed log event before declaring the station
/// not logging, in seconds.
const NOT_LOGGING_GRACE: f64 = 180.0;
/// How long past an expected event it is declared missed, in seconds.
const EVENT_OVERDUE: f64 = 6.0;
/// In fast sync the pointer is only re-read this close to a log event.
const LOG_DUE_WINDOW: f64 = 10.0;
/// Longest logging interval the console accepts, in minutes.
pub const MAX_READ_PERIOD: u8 = 240;

/// Offset of the logging interval in the fixed block.
const READ_PERIOD_OFFSET: u16 = 16;

/// Lifecycle state of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// Created, not yet talking to the station.
    Idle,
    /// Reading the fixed block and catching up with the log.
    Synchronizing,
    /// Steady-state polling.
    Polling,
    /// Sleeping through a window where USB access could wedge the station.
    LockedOut,
    /// Stopped on request or after a fatal error.
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Synchronizing => "synchronizing",
            AcquisitionState::Polling => "polling",
            AcquisitionState::LockedOut => "locked out",
            AcquisitionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How carefully the host synchronises with the station's log writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncQuality {
    /// Estimate log times from the station clock or entry delay and only
    /// re-read the pointer when a log write is due.
    #[default]
    Fast,
    /// Wait for a real pointer change at startup and re-read the pointer
    /// on every poll.
    Precise,
}

impl FromStr for SyncQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "0" => Ok(SyncQuality::Fast),
            "precise" | "1" => Ok(SyncQuality::Precise),
            _ => Err(Error::invalid_config(format!(
                "unknown sync quality '{}', expected fast or precise",
                s
            ))),
        }
    }
}

/// Acquisition tuning.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Seconds either side of a clock event to keep off the bus.
    pub usb_activity_margin: f64,
    /// Synchronisation quality.
    pub sync: SyncQuality,
    /// Retry policy for device reads.
    pub retry: RetryConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            usb_activity_margin: 3.0,
            sync: SyncQuality::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Set the USB activity margin (negative values are treated as zero).
    #[must_use]
    pub fn usb_activity_margin(mut self, seconds: f64) -> Self {
        self.usb_activity_margin = seconds.max(0.0);
        self
    }

    /// Set the synchronisation quality.
    #[must_use]
    pub fn sync(mut self, sync: SyncQuality) -> Self {
        self.sync = sync;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// A station together with the clocks that pace access to it.
///
/// Every operation first sleeps through any unsafe window, so retries of
/// a failed read are paced as well.
struct StationLink<T> {
    station: Station<T>,
    station_clock: DriftingClock,
    sensor_clock: DriftingClock,
    margin: f64,
    time: SharedTimeSource,
    state: watch::Sender<AcquisitionState>,
}

impl<T: StationTransport> StationLink<T> {
    async fn wait_for_station(&mut self) {
        let mut resume = None;
        loop {
            let now = self.time.now();
            let pause = self
                .station_clock
                .avoid(now)
                .min(self.sensor_clock.avoid(now));
            if pause >= self.margin * 2.0 {
                break;
            }
            if resume.is_none() {
                resume = Some(self.state.send_replace(AcquisitionState::LockedOut));
            }
            debug!("avoid {:.2}", pause);
            tokio::time::sleep(Duration::from_secs_f64(pause.max(0.001))).await;
        }
        if let Some(previous) = resume {
            self.state.send_replace(previous);
        }
    }

    async fn fixed_block(&mut self, unbuffered: bool) -> Result<FixedBlock> {
        if unbuffered || self.station.cached_fixed_block().is_none() {
            self.wait_for_station().await;
        }
        Ok(self.station.fixed_block(unbuffered).await?.clone())
    }

    async fn current_pos(&mut self) -> Result<u16> {
        self.wait_for_station().await;
        self.station.current_pos().await
    }

    async fn read_sample(&mut self, ptr: u16, unbuffered: bool) -> Result<Sample> {
        self.wait_for_station().await;
        self.station.read_sample(ptr, unbuffered).await
    }

    async fn data_count(&mut self) -> Result<u16> {
        self.wait_for_station().await;
        let decoded = self.station.decode_fixed_block("data_count", true).await?;
        decoded
            .get("data_count")
            .and_then(|v| v.as_i64())
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| Error::decode("data_count missing from fixed block"))
    }

    async fn read_raw_entry(&mut self, ptr: u16) -> Result<Vec<u8>> {
        self.wait_for_station().await;
        self.station.read_raw_entry(ptr, true).await
    }

    async fn write_data(&mut self, data: Vec<(u16, u8)>) -> Result<()> {
        self.wait_for_station().await;
        self.station.write_data(&data).await
    }
}

/// Loop variables carried between polls.
#[derive(Debug)]
struct PollState {
    read_period: u8,
    log_interval: f64,
    old_ptr: u16,
    old_data: Sample,
    next_live: Option<f64>,
    next_log: Option<f64>,
    last_log: f64,
    ptr_time: f64,
    data_time: f64,
    not_logging: bool,
    last_status: Option<Status>,
}

/// Drives a station: startup catch-up followed by continuous polling.
pub struct Acquisition<T> {
    link: StationLink<T>,
    config: AcquisitionConfig,
    time: SharedTimeSource,
    poll: Option<PollState>,
    last_stored: Option<PrimitiveDateTime>,
    cursor: Option<Cursor>,
}

impl<T> fmt::Debug for Acquisition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition")
            .field("state", &*self.link.state.borrow())
            .field("sync", &self.config.sync)
            .field("last_stored", &self.last_stored)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl<T: StationTransport + 'static> Acquisition<T> {
    /// Create an acquisition loop, restoring persisted clock and fixed
    /// block state.
    pub fn new(
        transport: T,
        station_type: StationType,
        config: AcquisitionConfig,
        status: StationStatus,
        time: SharedTimeSource,
    ) -> Self {
        let margin = config.usb_activity_margin.max(0.0);
        let mut station = Station::new(transport, station_type);
        if let Some(fixed) = status.fixed_block {
            station = station.with_fixed_block(fixed);
        }
        let (state, _) = watch::channel(AcquisitionState::Idle);
        Self {
            link: StationLink {
                station,
                station_clock: DriftingClock::station(margin, status.station_clock),
                sensor_clock: DriftingClock::sensor(margin, status.sensor_clock),
                margin,
                time: time.clone(),
                state,
            },
            config,
            time,
            poll: None,
            last_stored: None,
            cursor: status.cursor,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        *self.link.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState> {
        self.link.state.subscribe()
    }

    fn set_state(&self, state: AcquisitionState) {
        self.link.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("acquisition {} -> {}", current, state);
            *current = state;
            true
        });
    }

    /// Station class.
    pub fn station_type(&self) -> StationType {
        self.link.station.station_type()
    }

    /// State to persist between runs.
    pub fn status(&self) -> StationStatus {
        StationStatus {
            fixed_block: self.link.station.cached_fixed_block().cloned(),
            station_clock: self.link.station_clock.state(),
            sensor_clock: self.link.sensor_clock.state(),
            cursor: self.cursor,
        }
    }

    /// Timestamp of the newest logged entry delivered so far.
    pub fn last_stored(&self) -> Option<PrimitiveDateTime> {
        self.last_stored
    }

    /// Pointer and timestamp of the newest logged entry delivered so far.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Mark the state machine stopped.
    pub fn stop(&self) {
        self.set_state(AcquisitionState::Stopped);
    }

    fn surface<V>(&self, result: Result<V>) -> Result<V> {
        if matches!(result, Err(Error::DeviceUnavailable { .. })) {
            self.set_state(AcquisitionState::Stopped);
        }
        result
    }

    /// Read the fixed block, from cache unless `unbuffered`.
    pub async fn fixed_block(&mut self, unbuffered: bool) -> Result<FixedBlock> {
        let result = with_retry(&self.config.retry, "fixed_block", &mut self.link, |link| {
            link.fixed_block(unbuffered).boxed()
        })
        .await;
        self.surface(result)
    }

    /// Read the address of the entry the station is filling.
    pub async fn current_pos(&mut self) -> Result<u16> {
        let result = with_retry(&self.config.retry, "current_pos", &mut self.link, |link| {
            link.current_pos().boxed()
        })
        .await;
        self.surface(result)
    }

    /// Read the log entry at `ptr`.
    pub async fn read_sample(&mut self, ptr: u16, unbuffered: bool) -> Result<Sample> {
        let result = with_retry(&self.config.retry, "read_sample", &mut self.link, |link| {
            link.read_sample(ptr, unbuffered).boxed()
        })
        .await;
        self.surface(result)
    }

    /// Number of entries in the station's log, including the one being
    /// filled.
    pub async fn data_count(&mut self) -> Result<u16> {
        let result = with_retry(&self.config.retry, "data_count", &mut self.link, |link| {
            link.data_count().boxed()
        })
        .await;
        self.surface(result)
    }

    /// Raw bytes of the log entry at `ptr`.
    pub async fn read_raw_entry(&mut self, ptr: u16) -> Result<Vec<u8>> {
        let result = with_retry(&self.config.retry, "read_raw_entry", &mut self.link, |link| {
            link.read_raw_entry(ptr).boxed()
        })
        .await;
        self.surface(result)
    }

    async fn read_period(&mut self) -> Result<u8> {
        self.fixed_block(false)
            .await?
            .read_period()
            .ok_or_else(|| Error::invalid_config("station reports a zero logging interval"))
    }

    /// Change the station's logging interval.
    pub async fn set_read_period(&mut self, minutes: u8) -> Result<()> {
        if !(1..=MAX_READ_PERIOD).contains(&minutes) {
            return Err(Error::invalid_config(format!(
                "logging interval must be 1..={} minutes, got {}",
                MAX_READ_PERIOD, minutes
            )));
        }
        let retry = RetryConfig::for_write();
        let data = [(READ_PERIOD_OFFSET, minutes)];
        let result = with_retry(&retry, "write_data", &mut self.link, |link| {
            link.write_data(data.to_vec()).boxed()
        })
        .await;
        self.surface(result)?;
        info!("logging interval set to {} minutes", minutes);
        self.poll = None;
        Ok(())
    }

    /// Catch up with entries logged since `last_stored`.
    ///
    /// Returns [`AcquisitionEvent::Logged`] events oldest-first. With
    /// [`SyncQuality::Precise`] this polls until the station next logs, so
    /// every timestamp is anchored to an observed pointer change.
    pub async fn synchronise(
        &mut self,
        last_stored: Option<PrimitiveDateTime>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AcquisitionEvent>> {
        self.set_state(AcquisitionState::Synchronizing);
        info!("Synchronising to weather station");
        self.last_stored = last_stored;
        self.poll = None;

        let fixed = self.fixed_block(true).await?;
        let read_period = fixed
            .read_period()
            .ok_or_else(|| Error::invalid_config("station reports a zero logging interval"))?;
        let ptr = self.current_pos().await?;
        let current = self.read_sample(ptr, true).await?;
        let delay = current.delay.unwrap_or(0);

        let mut sync = self.config.sync;
        if u16::from(delay) > u16::from(read_period) + 1 {
            warn!("station is not logging correctly, delay {} min", delay);
            sync = SyncQuality::Fast;
        }

        match sync {
            SyncQuality::Fast => {
                let now = self.time.now();
                let approx = now - f64::from(delay) * 60.0;
                let log_time = match self.link.station_clock.before(approx) {
                    Some(t) => t,
                    None => approx - 30.0,
                };
                debug!("est log time {}", to_timestamp(log_time));
                let events = self
                    .fetch_logged(to_timestamp(log_time), dec_ptr(ptr, self.station_type()), 0)
                    .await?;
                self.note_logged(&events);
                Ok(events)
            }
            SyncQuality::Precise => {
                let mut events = Vec::new();
                loop {
                    let Some(batch) = self.poll(cancel).await? else {
                        return Err(Error::Cancelled);
                    };
                    let logged = batch
                        .iter()
                        .any(|e| matches!(e, AcquisitionEvent::Logged { .. }));
                    events.extend(batch);
                    if logged {
                        return Ok(events);
                    }
                }
            }
        }
    }

    /// Walk the log backwards from `last_ptr`, which was logged at
    /// `last_date`, until reaching already stored data.
    ///
    /// `newer` counts complete entries after `last_ptr` that have already
    /// been delivered.
    async fn fetch_logged(
        &mut self,
        mut last_date: PrimitiveDateTime,
        mut last_ptr: u16,
        newer: u16,
    ) -> Result<Vec<AcquisitionEvent>> {
        let station_type = self.station_type();
        let read_period = self.read_period().await?;

        let stop_at = self
            .last_stored
            .map(|t| t + time::Duration::seconds(i64::from(read_period) * 30));
        if stop_at.is_some_and(|stop| last_date <= stop) {
            return Ok(Vec::new());
        }

        // data_count includes the entry still being filled
        let mut max_count = self.data_count().await?.saturating_sub(1 + newer);
        if let (Some(cursor), Some(last)) = (self.cursor, self.last_stored)
            && cursor.timestamp == last
        {
            max_count = max_count.min(pointer_distance(cursor.ptr, last_ptr, station_type));
        }
        let max_delay = (i64::from(read_period) * 2).max(35);

        let mut entries = Vec::new();
        for _ in 0..max_count {
            if stop_at.is_some_and(|stop| last_date <= stop) {
                break;
            }
            let sample = self.read_sample(last_ptr, false).await?;
            match sample
                .delay
                .map(i64::from)
                .filter(|&d| d > 0 && d <= max_delay)
            {
                Some(delay) => {
                    entries.push(AcquisitionEvent::Logged {
                        reading: sample.at(last_date),
                        ptr: last_ptr,
                    });
                    last_date -= time::Duration::minutes(delay);
                }
                None => {
                    error!("invalid data at {:04x}, {}", last_ptr, last_date);
                    last_date -= time::Duration::minutes(i64::from(read_period));
                }
            }
            last_ptr = dec_ptr(last_ptr, station_type);
        }

        entries.reverse();
        info!("{} catchup records", entries.len());
        Ok(entries)
    }

    fn note_logged(&mut self, events: &[AcquisitionEvent]) {
        for event in events {
            if let AcquisitionEvent::Logged { reading, ptr } = event
                && self.last_stored.is_none_or(|last| reading.timestamp > last)
            {
                self.last_stored = Some(reading.timestamp);
                self.cursor = Some(Cursor {
                    ptr: *ptr,
                    timestamp: reading.timestamp,
                });
            }
        }
    }

    async fn start_polling(&mut self) -> Result<PollState> {
        let read_period = self.read_period().await?;
        let log_interval = f64::from(read_period) * 60.0;
        debug!("read period {}", read_period);

        let old_ptr = self.current_pos().await?;
        let old_data = self.read_sample(old_ptr, true).await?;
        let now = self.time.now();
        let next_live = self.link.sensor_clock.before(now + LIVE_INTERVAL);
        let now = match next_live {
            Some(t) => t - LIVE_INTERVAL,
            None => now - LIVE_INTERVAL,
        };
        let last_log = now - f64::from(old_data.delay.unwrap_or(0)) * 60.0;
        let next_log = self.link.station_clock.before(last_log + log_interval);

        self.set_state(AcquisitionState::Polling);
        Ok(PollState {
            read_period,
            log_interval,
            old_ptr,
            old_data,
            next_live,
            next_log,
            last_log,
            ptr_time: 0.0,
            data_time: 0.0,
            not_logging: false,
            last_status: None,
        })
    }

    fn next_pause(&self, p: &PollState) -> f64 {
        let now = self.time.now();
        let advance = now + self.link.margin.max(MIN_PAUSE) + MIN_PAUSE;
        let mut pause = match p.next_live {
            Some(next_live) => next_live - advance,
            None => MIN_PAUSE,
        };
        if !p.not_logging {
            if let Some(next_log) = p.next_log {
                pause = pause.min(next_log - advance);
            } else if i64::from(p.old_data.delay.unwrap_or(0)) >= i64::from(p.read_period) - 1 {
                pause = MIN_PAUSE;
            }
        }
        pause.max(MIN_PAUSE)
    }

    /// Sleep until the next expected station event, then run one read
    /// cycle.
    ///
    /// Returns `None` once `cancel` fires. Cancellation is only observed
    /// while sleeping; a started read cycle always completes.
    pub async fn poll(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<AcquisitionEvent>>> {
        if cancel.is_cancelled() {
            self.set_state(AcquisitionState::Stopped);
            return Ok(None);
        }
        let mut p = match self.poll.take() {
            Some(p) => p,
            None => self.start_polling().await?,
        };

        let pause = self.next_pause(&p);
        debug!("delay {:?}, pause {:.2}", p.old_data.delay, pause);
        tokio::select! {
            _ = cancel.cancelled() => {
                self.poll = Some(p);
                self.set_state(AcquisitionState::Stopped);
                return Ok(None);
            }
            _ = tokio::time::sleep(Duration::from_secs_f64(pause)) => {}
        }

        let result = self.step(&mut p).await;
        self.poll = Some(p);
        let events = result?;
        let events = self.fill_gaps(events).await?;
        Ok(Some(events))
    }

    /// Fetch any entries missed before a freshly logged one.
    async fn fill_gaps(&mut self, events: Vec<AcquisitionEvent>) -> Result<Vec<AcquisitionEvent>> {
        let read_period = self.read_period().await?;
        let max_log_interval =
            time::Duration::minutes(i64::from(read_period)) + time::Duration::seconds(66);

        let mut out = Vec::with_capacity(events.len());
        for event in events {
            if let AcquisitionEvent::Logged { reading, ptr } = &event
                && self
                    .last_stored
                    .is_none_or(|last| reading.timestamp >= last + max_log_interval)
            {
                let delay = i64::from(reading.sample.delay.unwrap_or(read_period));
                let missing = self
                    .fetch_logged(
                        reading.timestamp - time::Duration::minutes(delay),
                        dec_ptr(*ptr, self.station_type()),
                        1,
                    )
                    .await?;
                self.note_logged(&missing);
                out.extend(missing);
            }
            self.note_logged(std::slice::from_ref(&event));
            out.push(event);
        }
        Ok(out)
    }

    async fn step(&mut self, p: &mut PollState) -> Result<Vec<AcquisitionEvent>> {
        let mut events = Vec::new();
        let checked_at = self.time.now();
        let last_ptr_time = p.ptr_time;
        let pointer_due = self.config.sync == SyncQuality::Precise
            || p.not_logging
            || p.next_log.is_none_or(|t| checked_at > t - LOG_DUE_WINDOW)
            || i64::from(p.old_data.delay.unwrap_or(0)) >= i64::from(p.read_period) - 1;
        let new_ptr = if pointer_due {
            let ptr = self.current_pos().await?;
            p.ptr_time = self.time.now();
            ptr
        } else {
            p.old_ptr
        };
        let ptr_time = p.ptr_time;

        let last_data_time = p.data_time;
        let new_data = self.read_sample(p.old_ptr, true).await?;
        let data_time = self.time.now();
        p.data_time = data_time;

        // when the pointer moves the console refreshes its indoor sensors
        if new_ptr != p.old_ptr {
            p.old_data.hum_in = new_data.hum_in;
            p.old_data.temp_in = new_data.temp_in;
            p.old_data.abs_pressure = new_data.abs_pressure;
        }

        if p.last_status != Some(new_data.status) {
            match p.last_status {
                Some(old) => {
                    warn!("status {}", new_data.status);
                    events.push(AcquisitionEvent::StatusChanged {
                        old,
                        new: new_data.status,
                    });
                }
                None if new_data.status != Status::default() => {
                    warn!("status {}", new_data.status)
                }
                None => {}
            }
            p.last_status = Some(new_data.status);
        }
        if new_data.status.lost_connection() && !p.old_data.status.lost_connection() {
            // lost contact can be flagged at any time
            p.old_data = new_data;
        }

        let overdue = {
            let max_log_interval = time::Duration::minutes(i64::from(p.read_period))
                + time::Duration::seconds(66);
            let now = to_timestamp(data_time);
            self.last_stored
                .is_some_and(|last| now >= last + max_log_interval)
        };

        if new_data.sensors_differ(&p.old_data) {
            debug!("live_data new data");
            if data_time - last_data_time < EVENT_MARGIN {
                // data has just changed, so this is a broadcast time
                if let Some(measurement) = self.link.sensor_clock.set_clock(data_time) {
                    events.push(AcquisitionEvent::DriftMeasured {
                        clock: ClockKind::Sensor,
                        measurement,
                    });
                }
            } else if let Some(next_live) = p.next_live
                && data_time < next_live - EVENT_MARGIN
            {
                warn!("live_data lost sync {:.1}", data_time - next_live);
                self.link.sensor_clock.invalidate();
            }
            p.next_live = self.link.sensor_clock.before(data_time + EVENT_MARGIN);
            if let Some(next_live) = p.next_live {
                if !overdue {
                    events.push(AcquisitionEvent::Live {
                        reading: new_data.at(to_timestamp(next_live)),
                        ptr: p.old_ptr,
                    });
                }
                let next_live = next_live + LIVE_INTERVAL;
                p.next_live = Some(next_live);
                if p.not_logging {
                    // stand in for the station's own logging
                    let next_log = *p.next_log.get_or_insert(next_live);
                    if next_live > next_log {
                        events.push(AcquisitionEvent::Logged {
                            reading: new_data.at(to_timestamp(next_log)),
                            ptr: p.old_ptr,
                        });
                        p.next_log = Some(next_log + p.log_interval);
                    }
                }
            }
        } else if let Some(next_live) = p.next_live
            && data_time > next_live + EVENT_OVERDUE
        {
            info!("live_data missed");
            p.next_live = Some(next_live + LIVE_INTERVAL);
        }
        p.old_data = new_data;

        if new_ptr != p.old_ptr {
            info!("new pointer detected {:06x}", new_ptr);
            events.push(AcquisitionEvent::NewPointer {
                old: p.old_ptr,
                new: new_ptr,
            });
            if p.not_logging {
                error!("station is logging data");
                p.not_logging = false;
                events.push(AcquisitionEvent::LoggingResumed);
            }
            p.last_log = ptr_time - EVENT_MARGIN;
            if ptr_time - last_ptr_time < EVENT_MARGIN {
                // pointer has just changed, so this is a logging time
                if let Some(measurement) = self.link.station_clock.set_clock(ptr_time) {
                    events.push(AcquisitionEvent::DriftMeasured {
                        clock: ClockKind::Station,
                        measurement,
                    });
                }
            } else if let Some(next_log) = p.next_log {
                if ptr_time < next_log - EVENT_MARGIN {
                    warn!("live_data lost log sync {:.1}", ptr_time - next_log);
                    self.link.station_clock.invalidate();
                }
            } else {
                info!("missed ptr change time");
            }

            if let Some(delay) = new_data.delay
                && delay > 0
                && p.read_period > delay
            {
                p.read_period = delay;
                p.log_interval = f64::from(delay) * 60.0;
                warn!("reset read period {}", delay);
            }

            p.next_log = self.link.station_clock.before(ptr_time + EVENT_MARGIN);
            let logged_at = match p.next_log {
                Some(next_log) => {
                    p.next_log = Some(next_log + p.log_interval);
                    next_log
                }
                // best guess of the logging time
                None => ptr_time - self.link.margin / 2.0,
            };
            events.push(AcquisitionEvent::Logged {
                reading: new_data.at(to_timestamp(logged_at)),
                ptr: p.old_ptr,
            });
            p.old_ptr = new_ptr;
            p.old_data.delay = Some(0);
            p.data_time = 0.0;
        } else if checked_at > p.last_log + p.log_interval + NOT_LOGGING_GRACE {
            // stop hammering USB if the station is not logging
            if !p.not_logging {
                error!("station is not logging data");
                events.push(AcquisitionEvent::NotLogging);
            }
            p.not_logging = true;
        } else if let Some(next_log) = p.next_log
            && checked_at > next_log + EVENT_OVERDUE
        {
            warn!("live_data log extended");
            p.next_log = Some(next_log + 60.0);
        }

        Ok(events)
    }

    /// Synchronise, then poll until cancelled, sending every event to
    /// `events`.
    ///
    /// Returns `Ok(())` on cancellation or when the receiver is dropped.
    pub async fn run(
        &mut self,
        last_stored: Option<PrimitiveDateTime>,
        cancel: CancellationToken,
        events: EventSender,
    ) -> Result<()> {
        let initial = match self.synchronise(last_stored, &cancel).await {
            Ok(initial) => initial,
            Err(Error::Cancelled) => {
                self.stop();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for event in initial {
            if events.send(event).await.is_err() {
                self.stop();
                return Ok(());
            }
        }
        while let Some(batch) = self.poll(&cancel).await? {
            for event in batch {
                if events.send(event).await.is_err() {
                    debug!("event receiver dropped, stopping");
                    self.stop();
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
