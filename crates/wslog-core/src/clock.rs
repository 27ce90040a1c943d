//! Station and sensor clock tracking.
//!
//! The console has two free-running clocks the host cannot read: one that
//! triggers a log write on the minute and one that paces the 48 second
//! sensor broadcasts. Touching USB while either fires can wedge the
//! interface, so the host learns each clock's phase and drift from
//! observed data changes and schedules transfers away from them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{info, warn};

const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;

/// Nominal period of the station's logging clock in seconds.
pub const STATION_PERIOD: f64 = 60.0;
/// Nominal period of the sensor broadcast clock in seconds.
pub const SENSOR_PERIOD: f64 = 48.0;

/// Minimum gap between clock observations used to measure drift.
const DRIFT_MIN_GAP: f64 = 8.0 * 3600.0;
/// Clock observations older than this are discarded.
const CLOCK_MAX_AGE: f64 = SECONDS_PER_DAY;
/// Largest change applied to the drift estimate per measurement, in s/day.
const DRIFT_STEP_LIMIT: f64 = 3.0;

/// Returned by [`DriftingClock::avoid`] when the clock phase is unknown.
pub const UNKNOWN_PHASE: f64 = 1000.0;

/// Source of wall-clock time in seconds since the Unix epoch.
pub trait TimeSource: Send + Sync {
    /// Current time.
    fn now(&self) -> f64;
}

/// Shared time source.
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// The host system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> f64 {
        OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
    }
}

/// Wall time derived from tokio's clock.
///
/// Under `tokio::time::pause` this advances only when the runtime's clock
/// does, which makes timing-sensitive code testable.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_wall: f64,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Start counting from the current system time.
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now())
    }

    /// Start counting from `wall` seconds since the epoch.
    pub fn starting_at(wall: f64) -> Self {
        Self {
            origin_wall: wall,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioClock {
    fn now(&self) -> f64 {
        self.origin_wall + self.origin.elapsed().as_secs_f64()
    }
}

/// Convert epoch seconds to a UTC timestamp, truncated to whole seconds.
pub fn to_timestamp(secs: f64) -> PrimitiveDateTime {
    let whole = secs.floor() as i64;
    let utc = OffsetDateTime::from_unix_timestamp(whole).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    PrimitiveDateTime::new(utc.date(), utc.time())
}

/// Convert a UTC timestamp to epoch seconds.
pub fn from_timestamp(ts: PrimitiveDateTime) -> f64 {
    ts.assume_utc().unix_timestamp() as f64
}

/// Persisted part of a [`DriftingClock`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    /// Epoch time of the last observed clock event.
    pub clock: Option<f64>,
    /// Rolling drift estimate in seconds per day.
    pub drift: f64,
}

/// A completed drift measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftMeasurement {
    /// Drift seen over the last measurement gap, in s/day.
    pub measured: f64,
    /// Updated rolling average, in s/day.
    pub average: f64,
}

/// Tracks the phase and drift of one periodic device clock.
#[derive(Debug, Clone)]
pub struct DriftingClock {
    name: &'static str,
    period: f64,
    margin: f64,
    state: ClockState,
    old_clock: Option<f64>,
    real_period: f64,
}

impl DriftingClock {
    /// Create a clock, restoring previously persisted state.
    pub fn new(name: &'static str, period: f64, margin: f64, state: ClockState) -> Self {
        let mut clock = Self {
            name,
            period,
            margin,
            state,
            old_clock: state.clock,
            real_period: period,
        };
        clock.set_real_period();
        clock
    }

    /// The console's logging clock.
    pub fn station(margin: f64, state: ClockState) -> Self {
        Self::new("station", STATION_PERIOD, margin, state)
    }

    /// The sensor broadcast clock.
    pub fn sensor(margin: f64, state: ClockState) -> Self {
        Self::new("sensor", SENSOR_PERIOD, margin, state)
    }

    /// Name used in log messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// State to persist.
    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Whether the clock phase is known.
    pub fn is_set(&self) -> bool {
        self.state.clock.is_some()
    }

    /// Period corrected for drift.
    pub fn real_period(&self) -> f64 {
        self.real_period
    }

    fn set_real_period(&mut self) {
        self.real_period = self.period * (1.0 + self.state.drift / SECONDS_PER_DAY);
    }

    /// Latest expected clock event at or before `now`.
    pub fn before(&self, now: f64) -> Option<f64> {
        let clock = self.state.clock?;
        let error = (now - clock).rem_euclid(self.real_period);
        Some(now - error)
    }

    /// Seconds from `now` until the clock next comes within the margin.
    ///
    /// Returns [`UNKNOWN_PHASE`] when the phase is unknown. A phase more
    /// than a day old is forgotten so it gets re-measured.
    pub fn avoid(&mut self, now: f64) -> f64 {
        let Some(clock) = self.state.clock else {
            return UNKNOWN_PHASE;
        };
        let phase = now - clock;
        if phase > CLOCK_MAX_AGE {
            self.state.clock = None;
            return UNKNOWN_PHASE;
        }
        (self.margin - phase).rem_euclid(self.real_period)
    }

    /// Record that the clock was observed to fire at `now`.
    ///
    /// Observations within 2 s of the prediction are ignored. Once the
    /// previous accepted observation is at least 8 hours old the drift is
    /// measured and folded into the rolling estimate.
    pub fn set_clock(&mut self, now: f64) -> Option<DriftMeasurement> {
        if let Some(clock) = self.state.clock {
            let diff = (now - clock).rem_euclid(self.real_period);
            if diff < 2.0 || diff > self.real_period - 2.0 {
                return None;
            }
            warn!("unexpected {} clock change", self.name);
        }
        self.state.clock = Some(now);
        info!("setting {} clock {:.1}", self.name, now.rem_euclid(self.period));

        let mut measurement = None;
        if let Some(old_clock) = self.old_clock {
            let gap = now - old_clock;
            if gap < DRIFT_MIN_GAP {
                return None;
            }
            let mut drift = gap.rem_euclid(self.period);
            if drift > self.period / 2.0 {
                drift -= self.period;
            }
            let drift = drift * SECONDS_PER_DAY / gap;
            self.state.drift +=
                (drift - self.state.drift).clamp(-DRIFT_STEP_LIMIT, DRIFT_STEP_LIMIT) / 4.0;
            self.set_real_period();
            info!(
                "{} clock drift measured {:.2} s/day, average {:.2} s/day",
                self.name, drift, self.state.drift
            );
            measurement = Some(DriftMeasurement {
                measured: drift,
                average: self.state.drift,
            });
        }
        self.old_clock = self.state.clock;
        measurement
    }

    /// Forget the clock phase after losing sync.
    pub fn invalidate(&mut self) {
        self.state.clock = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_before_rounds_down_to_event() {
        let clock = DriftingClock::sensor(
            3.0,
            ClockState {
                clock: Some(1000.0),
                drift: 0.0,
            },
        );
        assert_eq!(clock.before(1000.0), Some(1000.0));
        assert_eq!(clock.before(1047.0), Some(1000.0));
        assert_eq!(clock.before(1048.0), Some(1048.0));
        assert_eq!(clock.before(990.0), Some(952.0));

        let unset = DriftingClock::sensor(3.0, ClockState::default());
        assert_eq!(unset.before(1000.0), None);
    }

    #[test]
    fn test_avoid_window() {
        let mut clock = DriftingClock::station(
            3.0,
            ClockState {
                clock: Some(0.0),
                drift: 0.0,
            },
        );
        // 3 s after an event we are exactly at the end of the unsafe window
        assert_eq!(clock.avoid(3.0), 0.0);
        // 10 s after an event the next window opens 53 s later
        assert_eq!(clock.avoid(10.0), 53.0);
        // just before the next event
        assert!(clock.avoid(59.0) < 6.0);

        let mut unset = DriftingClock::station(3.0, ClockState::default());
        assert_eq!(unset.avoid(10.0), UNKNOWN_PHASE);
    }

    #[test]
    fn test_avoid_forgets_stale_clock() {
        let mut clock = DriftingClock::station(
            3.0,
            ClockState {
                clock: Some(0.0),
                drift: 0.0,
            },
        );
        assert_eq!(clock.avoid(CLOCK_MAX_AGE + 1.0), UNKNOWN_PHASE);
        assert!(!clock.is_set());
    }

    #[test]
    fn test_set_clock_ignores_small_differences() {
        let mut clock = DriftingClock::sensor(3.0, ClockState::default());
        assert!(clock.set_clock(100.0).is_none());
        assert_eq!(clock.state().clock, Some(100.0));

        clock.set_clock(100.0 + 48.0 * 10.0 + 1.5);
        assert_eq!(clock.state().clock, Some(100.0));

        clock.set_clock(100.0 + 20.0);
        assert_eq!(clock.state().clock, Some(120.0));
    }

    #[test]
    fn test_drift_measurement() {
        let mut clock = DriftingClock::station(3.0, ClockState::default());
        clock.set_clock(0.0);

        // ten hours later the clock fires 5 s late
        let gap = 10.0 * 3600.0;
        let report = clock.set_clock(gap + 5.0).unwrap();
        let expected = 5.0 * SECONDS_PER_DAY / (gap + 5.0);
        assert!((report.measured - expected).abs() < 1e-9);
        // step is clamped to 3 s/day then scaled by 1/4
        assert!((report.average - 0.75).abs() < 1e-9);
        assert!(clock.real_period() > STATION_PERIOD);
    }

    #[test]
    fn test_no_drift_before_eight_hours() {
        let mut clock = DriftingClock::station(3.0, ClockState::default());
        clock.set_clock(0.0);
        assert!(clock.set_clock(3600.0 + 10.0).is_none());
        assert_eq!(clock.state().drift, 0.0);
    }

    #[test]
    fn test_negative_drift_folds_into_half_period() {
        let mut clock = DriftingClock::station(3.0, ClockState::default());
        clock.set_clock(0.0);
        // 50 s into the period means 10 s early
        let report = clock.set_clock(9.0 * 3600.0 + 50.0).unwrap();
        assert!(report.measured < 0.0);
        assert!(report.average < 0.0);
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = to_timestamp(1_700_000_000.7);
        assert_eq!(from_timestamp(ts), 1_700_000_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(500.0);
        tokio::time::advance(std::time::Duration::from_secs(48)).await;
        assert_eq!(clock.now(), 548.0);
    }
}
