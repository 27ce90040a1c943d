//! Hourly, daily and monthly summaries of raw readings.
//!
//! Summaries are derived data: each run truncates the last (possibly
//! partial) window of every summary store and recomputes forward from
//! there, so a run after new raw data arrives gives the same rows as a
//! full reprocess would.

use std::path::Path;

use serde::Serialize;
use time::{Duration, PrimitiveDateTime};
use tracing::{debug, info, warn};
use wslog_types::{Reading, WindDirection};

use crate::error::Result;
use crate::partition::Partitioning;
use crate::store::{StoreOptions, TimeSeriesStore};
use crate::summary::{Field, FieldStats, MonthlyRecord, SummaryFields, SummaryRecord};
use crate::window::{Period, Window, WindowSpec};

/// Rain counter decreases smaller than this are read noise, not resets.
const RAIN_RESET_EPSILON: f64 = 0.001;

/// Largest believable rainfall per minute of log interval, in mm.
const MAX_RAIN_PER_MINUTE: f64 = 5.0;

/// How far before a window the rain baseline is looked for.
const RAIN_LOOKBACK: Duration = Duration::hours(3);

/// Summariser settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummariserConfig {
    /// Local hour at which a day ends (24 means midnight).
    pub day_end_hour: u8,
    /// Daily rainfall above which a day counts as a rain day, in mm.
    pub rain_day_threshold: f64,
    /// Local winter time minus UTC.
    pub utc_offset: Duration,
    /// Relative minus absolute pressure, in hPa.
    pub pressure_offset: Option<f64>,
}

impl Default for SummariserConfig {
    fn default() -> Self {
        Self {
            day_end_hour: 9,
            rain_day_threshold: 0.2,
            utc_offset: Duration::ZERO,
            pressure_offset: None,
        }
    }
}

/// A decrease of the rain counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CounterReset {
    /// Raw record where the counter went down.
    #[serde(with = "wslog_types::timestamp")]
    pub timestamp: PrimitiveDateTime,
    /// Counter before, in mm.
    pub previous: f64,
    /// Counter after, in mm.
    pub current: f64,
}

/// What a summariser run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryReport {
    /// Hourly windows written.
    pub hourly: usize,
    /// Daily windows written.
    pub daily: usize,
    /// Monthly windows written.
    pub monthly: usize,
    /// Rain counter resets seen in the recomputed raw data.
    pub counter_resets: Vec<CounterReset>,
    /// Rain increases rejected as implausible.
    pub rain_jumps: usize,
}

/// The raw store and the three summary stores of one data directory.
pub struct DataStores {
    pub raw: TimeSeriesStore<Reading>,
    pub hourly: TimeSeriesStore<SummaryRecord>,
    pub daily: TimeSeriesStore<SummaryRecord>,
    pub monthly: TimeSeriesStore<MonthlyRecord>,
}

impl DataStores {
    /// Open `raw/`, `hourly/`, `daily/` and `monthly/` under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P, options: StoreOptions) -> Result<Self> {
        let dir = data_dir.as_ref();
        Ok(Self {
            raw: TimeSeriesStore::open(dir.join("raw"), Partitioning::Day, options)?,
            hourly: TimeSeriesStore::open(dir.join("hourly"), Partitioning::Day, options)?,
            daily: TimeSeriesStore::open(dir.join("daily"), Partitioning::Month, options)?,
            monthly: TimeSeriesStore::open(dir.join("monthly"), Partitioning::Year, options)?,
        })
    }

    /// Flush every store.
    pub fn flush(&mut self) -> Result<()> {
        self.raw.flush()?;
        self.hourly.flush()?;
        self.daily.flush()?;
        self.monthly.flush()
    }
}

enum RainStep {
    Delta(f64),
    Reset { previous: f64, current: f64 },
    Jump(f64),
    Unknown,
}

/// Step from the last known rain total to `reading`'s. A reading without
/// a total leaves the baseline where it was.
fn rain_step(last_rain: Option<f64>, reading: &Reading) -> RainStep {
    let (Some(previous), Some(current)) = (last_rain, reading.sample.rain) else {
        return RainStep::Unknown;
    };
    let delta = current - previous;
    if delta < -RAIN_RESET_EPSILON {
        return RainStep::Reset { previous, current };
    }
    let minutes = f64::from(reading.sample.delay.unwrap_or(1).max(1));
    if delta > minutes * MAX_RAIN_PER_MINUTE {
        return RainStep::Jump(delta);
    }
    RainStep::Delta(delta.max(0.0))
}

/// The newest rain total in the `RAIN_LOOKBACK` before `start`.
fn last_rain_before(
    raw: &mut TimeSeriesStore<Reading>,
    start: PrimitiveDateTime,
) -> Result<Option<f64>> {
    let mut last_rain = None;
    for item in raw.slice(Some(start - RAIN_LOOKBACK), Some(start)) {
        if let Some(rain) = item?.sample.rain {
            last_rain = Some(rain);
        }
    }
    Ok(last_rain)
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[derive(Default)]
struct FieldAccumulator {
    stats: FieldStats,
    sum: f64,
}

impl FieldAccumulator {
    fn add(&mut self, value: f64, ts: PrimitiveDateTime) {
        self.sum += value;
        self.stats.count += 1;
        self.take_extremes(value, ts, value, ts);
        self.stats.last = Some(value);
        self.stats.last_t = Some(ts);
    }

    fn merge(&mut self, other: &FieldStats) {
        let (Some(ave), true) = (other.ave, other.count > 0) else {
            return;
        };
        self.sum += ave * f64::from(other.count);
        self.stats.count += other.count;
        if let (Some(min), Some(min_t), Some(max), Some(max_t)) =
            (other.min, other.min_t, other.max, other.max_t)
        {
            self.take_extremes(min, min_t, max, max_t);
        }
        if other.last.is_some() {
            self.stats.last = other.last;
            self.stats.last_t = other.last_t;
        }
    }

    // Strict comparisons keep the earliest extreme on ties.
    fn take_extremes(
        &mut self,
        min: f64,
        min_t: PrimitiveDateTime,
        max: f64,
        max_t: PrimitiveDateTime,
    ) {
        if self.stats.min.is_none_or(|m| min < m) {
            self.stats.min = Some(min);
            self.stats.min_t = Some(min_t);
        }
        if self.stats.max.is_none_or(|m| max > m) {
            self.stats.max = Some(max);
            self.stats.max_t = Some(max_t);
        }
    }

    fn finish(self) -> FieldStats {
        let mut stats = self.stats;
        if stats.count > 0 {
            stats.ave = Some(round_to(self.sum / f64::from(stats.count), 2));
        }
        stats
    }
}

/// Sum of wind vectors, each as long as its speed.
#[derive(Default)]
struct WindVector {
    east: f64,
    north: f64,
}

impl WindVector {
    fn add(&mut self, dir: WindDirection, speed: f64) {
        let theta = dir.degrees().to_radians();
        self.east += speed * theta.sin();
        self.north += speed * theta.cos();
    }

    fn direction(&self) -> Option<WindDirection> {
        if self.east.hypot(self.north) < 1e-9 {
            return None;
        }
        let sixteenths = (self.east.atan2(self.north).to_degrees() / 22.5).round() as i64;
        WindDirection::new(sixteenths.rem_euclid(16) as u8)
    }
}

struct FieldSet([FieldAccumulator; 10]);

impl FieldSet {
    fn new() -> Self {
        Self(Default::default())
    }

    fn finish(self) -> SummaryFields {
        let mut fields = SummaryFields::default();
        for (field, acc) in Field::ALL.into_iter().zip(self.0) {
            *fields.get_mut(field) = acc.finish();
        }
        fields
    }
}

struct WindowAccumulator {
    window: Window,
    count: u32,
    fields: FieldSet,
    wind: WindVector,
    rain: f64,
}

impl WindowAccumulator {
    fn new(window: Window) -> Self {
        Self {
            window,
            count: 0,
            fields: FieldSet::new(),
            wind: WindVector::default(),
            rain: 0.0,
        }
    }

    fn add(&mut self, reading: &Reading, rain: f64, pressure_offset: Option<f64>) {
        self.count += 1;
        for (field, acc) in Field::ALL.iter().zip(self.fields.0.iter_mut()) {
            if let Some(value) = field.value(reading, pressure_offset) {
                acc.add(value, reading.timestamp);
            }
        }
        if let (Some(dir), Some(speed)) = (reading.sample.wind_dir, reading.sample.wind_ave) {
            self.wind.add(dir, speed);
        }
        self.rain += rain;
    }

    fn finish(self) -> SummaryRecord {
        SummaryRecord {
            idx: self.window.end,
            start: self.window.start,
            count: self.count,
            fields: self.fields.finish(),
            wind_dir: self.wind.direction(),
            rain: round_to(self.rain, 2),
        }
    }
}

struct MonthAccumulator {
    window: Window,
    days: u32,
    fields: FieldSet,
    daily_min: (f64, u32),
    daily_max: (f64, u32),
    wind: WindVector,
    rain: f64,
    rain_days: u32,
}

impl MonthAccumulator {
    fn new(window: Window) -> Self {
        Self {
            window,
            days: 0,
            fields: FieldSet::new(),
            daily_min: (0.0, 0),
            daily_max: (0.0, 0),
            wind: WindVector::default(),
            rain: 0.0,
            rain_days: 0,
        }
    }

    fn add(&mut self, day: &SummaryRecord, rain_day_threshold: f64) {
        if day.count > 0 {
            self.days += 1;
        }
        for (field, acc) in Field::ALL.iter().zip(self.fields.0.iter_mut()) {
            acc.merge(day.fields.get(*field));
        }
        if let Some(min) = day.fields.temp_out.min {
            self.daily_min.0 += min;
            self.daily_min.1 += 1;
        }
        if let Some(max) = day.fields.temp_out.max {
            self.daily_max.0 += max;
            self.daily_max.1 += 1;
        }
        if let (Some(dir), Some(speed)) = (day.wind_dir, day.fields.wind_ave.ave) {
            self.wind.add(dir, speed);
        }
        self.rain += day.rain;
        if day.rain > rain_day_threshold {
            self.rain_days += 1;
        }
    }

    fn finish(self) -> MonthlyRecord {
        let mean = |(sum, n): (f64, u32)| (n > 0).then(|| round_to(sum / f64::from(n), 2));
        MonthlyRecord {
            idx: self.window.end,
            start: self.window.start,
            days: self.days,
            fields: self.fields.finish(),
            temp_out_min_ave: mean(self.daily_min),
            temp_out_max_ave: mean(self.daily_max),
            wind_dir: self.wind.direction(),
            rain: round_to(self.rain, 2),
            rain_days: self.rain_days,
        }
    }
}

#[derive(Default)]
struct PassOutcome {
    written: usize,
    counter_resets: Vec<CounterReset>,
    rain_jumps: usize,
}

/// Derives summary stores from the raw store.
#[derive(Debug, Clone)]
pub struct Summariser {
    config: SummariserConfig,
    windows: WindowSpec,
}

impl Summariser {
    /// Create a summariser.
    pub fn new(config: SummariserConfig) -> Self {
        Self {
            windows: WindowSpec::new(config.day_end_hour, config.utc_offset),
            config,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &SummariserConfig {
        &self.config
    }

    /// Window alignment in use.
    pub fn windows(&self) -> &WindowSpec {
        &self.windows
    }

    /// Bring the summary stores up to date with the raw store.
    pub fn process(&self, stores: &mut DataStores) -> Result<SummaryReport> {
        let hourly = self.summarise_raw(Period::Hour, &mut stores.raw, &mut stores.hourly)?;
        let daily = self.summarise_raw(Period::Day, &mut stores.raw, &mut stores.daily)?;
        let monthly = self.summarise_months(&mut stores.daily, &mut stores.monthly)?;

        // Both raw passes see the same rain steps; report them once.
        for reset in &hourly.counter_resets {
            warn!(
                "Rain counter reset detected at {}: {} -> {} mm",
                crate::record::format_timestamp(reset.timestamp),
                reset.previous,
                reset.current
            );
        }
        let report = SummaryReport {
            hourly: hourly.written,
            daily: daily.written,
            monthly,
            counter_resets: hourly.counter_resets,
            rain_jumps: hourly.rain_jumps,
        };
        debug!(
            "Summarised {} hourly, {} daily, {} monthly windows",
            report.hourly, report.daily, report.monthly
        );
        Ok(report)
    }

    /// Discard every summary and rebuild them from all raw data.
    ///
    /// Needed after changing the day-end hour, UTC offset, pressure offset
    /// or rain-day threshold.
    pub fn reprocess(&self, stores: &mut DataStores) -> Result<SummaryReport> {
        info!("Reprocessing all summaries");
        stores.hourly.clear()?;
        stores.daily.clear()?;
        stores.monthly.clear()?;
        let report = self.process(stores)?;
        info!(
            "Reprocessed {} hourly, {} daily and {} monthly summaries",
            report.hourly, report.daily, report.monthly
        );
        Ok(report)
    }

    fn summarise_raw(
        &self,
        period: Period,
        raw: &mut TimeSeriesStore<Reading>,
        target: &mut TimeSeriesStore<SummaryRecord>,
    ) -> Result<PassOutcome> {
        let restart = match target.last()? {
            Some(summary) => summary.start,
            None => match raw.first()? {
                Some(reading) => reading.timestamp,
                None => return Ok(PassOutcome::default()),
            },
        };
        let window = self.windows.containing(period, restart);
        target.truncate_from(window.end)?;

        let mut outcome = PassOutcome::default();
        let mut last_rain = last_rain_before(raw, window.start)?;
        let mut acc = WindowAccumulator::new(window);
        for item in raw.slice(Some(window.start), None) {
            let reading = item?;
            while reading.timestamp >= acc.window.end {
                let next = self.windows.next(period, acc.window);
                target.append(acc.finish())?;
                outcome.written += 1;
                acc = WindowAccumulator::new(next);
            }

            let rain = match rain_step(last_rain, &reading) {
                RainStep::Delta(delta) => delta,
                RainStep::Reset { previous, current } => {
                    outcome.counter_resets.push(CounterReset {
                        timestamp: reading.timestamp,
                        previous,
                        current,
                    });
                    0.0
                }
                RainStep::Jump(delta) => {
                    if period == Period::Hour {
                        warn!(
                            "Ignoring rain jump of {:.1} mm at {}",
                            delta,
                            crate::record::format_timestamp(reading.timestamp)
                        );
                    }
                    outcome.rain_jumps += 1;
                    0.0
                }
                RainStep::Unknown => 0.0,
            };
            acc.add(&reading, rain, self.config.pressure_offset);
            if reading.sample.rain.is_some() {
                last_rain = reading.sample.rain;
            }
        }
        target.append(acc.finish())?;
        outcome.written += 1;
        Ok(outcome)
    }

    fn summarise_months(
        &self,
        daily: &mut TimeSeriesStore<SummaryRecord>,
        monthly: &mut TimeSeriesStore<MonthlyRecord>,
    ) -> Result<usize> {
        let restart = match monthly.last()? {
            Some(month) => month.start,
            None => match daily.first()? {
                Some(day) => day.start,
                None => return Ok(0),
            },
        };
        let window = self.windows.containing(Period::Month, restart);
        monthly.truncate_from(window.end)?;

        let mut written = 0;
        let mut acc = MonthAccumulator::new(window);
        for item in daily.slice(Some(window.start), None) {
            let day = item?;
            if day.start < window.start {
                continue;
            }
            while day.start >= acc.window.end {
                let next = self.windows.next(Period::Month, acc.window);
                monthly.append(acc.finish())?;
                written += 1;
                acc = MonthAccumulator::new(next);
            }
            acc.add(&day, self.config.rain_day_threshold);
        }
        monthly.append(acc.finish())?;
        Ok(written + 1)
    }
}
