//! Core types for weather station data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use crate::error::ParseError;

/// Class of USB weather station console.
///
/// The class decides the size of a log entry and which optional sensors
/// are present. It cannot be detected reliably from the device, so it must
/// be configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StationType {
    /// WH1080 and compatible consoles (16 byte log entries).
    #[cfg_attr(feature = "serde", serde(rename = "1080"))]
    Wh1080,
    /// WH3080 consoles with solar sensors (20 byte log entries).
    #[cfg_attr(feature = "serde", serde(rename = "3080"))]
    Wh3080,
}

impl StationType {
    /// Size in bytes of one circular-buffer log entry.
    ///
    /// ```
    /// use wslog_types::StationType;
    ///
    /// assert_eq!(StationType::Wh1080.reading_len(), 16);
    /// assert_eq!(StationType::Wh3080.reading_len(), 20);
    /// ```
    #[must_use]
    pub fn reading_len(&self) -> usize {
        match self {
            StationType::Wh1080 => 16,
            StationType::Wh3080 => 20,
        }
    }

    /// Whether the station reports illuminance and UV index.
    #[must_use]
    pub fn has_solar(&self) -> bool {
        matches!(self, StationType::Wh3080)
    }
}

impl FromStr for StationType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1080" | "wh1080" => Ok(StationType::Wh1080),
            "3080" | "wh3080" => Ok(StationType::Wh3080),
            other => Err(ParseError::UnknownStationType(other.to_string())),
        }
    }
}

impl fmt::Display for StationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationType::Wh1080 => write!(f, "1080"),
            StationType::Wh3080 => write!(f, "3080"),
        }
    }
}

/// Status bits reported with every reading.
///
/// Bit 6 is set while the console has lost contact with the outdoor
/// sensors, bit 7 when the rain counter has overflowed. Other bits are
/// kept but have no known meaning.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Status(u8);

impl Status {
    /// Bit set when outdoor sensor contact is lost.
    pub const LOST_CONNECTION: u8 = 0x40;
    /// Bit set when the rain counter overflowed.
    pub const RAIN_OVERFLOW: u8 = 0x80;

    /// Wrap a raw status byte.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw status byte.
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Outdoor sensor contact lost.
    #[must_use]
    pub const fn lost_connection(&self) -> bool {
        self.0 & Self::LOST_CONNECTION != 0
    }

    /// Rain counter overflowed.
    #[must_use]
    pub const fn rain_overflow(&self) -> bool {
        self.0 & Self::RAIN_OVERFLOW != 0
    }
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.lost_connection() {
            flags.push("lost_connection");
        }
        if self.rain_overflow() {
            flags.push("rain_overflow");
        }
        if flags.is_empty() {
            write!(f, "ok")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

/// Compass wind direction in sixteenths of a full circle, 0 = north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct WindDirection(u8);

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

impl WindDirection {
    /// Create a direction from a compass index in `0..16`.
    #[must_use]
    pub fn new(index: u8) -> Option<Self> {
        (index < 16).then_some(Self(index))
    }

    /// Compass index in `0..16`.
    #[must_use]
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Bearing in degrees clockwise from north.
    #[must_use]
    pub fn degrees(&self) -> f64 {
        f64::from(self.0) * 22.5
    }

    /// Short compass label, e.g. `"NNE"`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        COMPASS_POINTS[usize::from(self.0)]
    }
}

impl TryFrom<u8> for WindDirection {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
            .ok_or_else(|| ParseError::InvalidData(format!("wind direction {value} out of range")))
    }
}

impl From<WindDirection> for u8 {
    fn from(value: WindDirection) -> Self {
        value.0
    }
}

impl fmt::Display for WindDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One decoded log entry as stored in station memory.
///
/// The station keeps no timestamps; `delay` is the number of minutes
/// between this entry and the previous one (or, for the entry currently
/// being filled, minutes since the last log event). Missing sensor values
/// are `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// Minutes since the previous entry.
    pub delay: Option<u8>,
    /// Indoor relative humidity in percent.
    pub hum_in: Option<u8>,
    /// Indoor temperature in °C.
    pub temp_in: Option<f64>,
    /// Outdoor relative humidity in percent.
    pub hum_out: Option<u8>,
    /// Outdoor temperature in °C.
    pub temp_out: Option<f64>,
    /// Absolute pressure in hPa.
    pub abs_pressure: Option<f64>,
    /// Average wind speed in m/s.
    pub wind_ave: Option<f64>,
    /// Wind gust speed in m/s.
    pub wind_gust: Option<f64>,
    /// Wind direction, `None` when the sensor reports it invalid.
    pub wind_dir: Option<WindDirection>,
    /// Rain gauge counter in mm (monotonic until reset or overflow).
    pub rain: Option<f64>,
    /// Status bits.
    pub status: Status,
    /// Illuminance in lux (3080 class only).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub illuminance: Option<f64>,
    /// UV index (3080 class only).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub uv: Option<u8>,
}

impl Sample {
    /// Attach a host timestamp, producing a storable [`Reading`].
    #[must_use]
    pub fn at(self, timestamp: PrimitiveDateTime) -> Reading {
        Reading {
            timestamp,
            sample: self,
        }
    }

    /// Whether any sensor value differs from `other`.
    ///
    /// `delay` is ignored because it counts up every minute without any
    /// new sensor data arriving.
    #[must_use]
    pub fn sensors_differ(&self, other: &Sample) -> bool {
        self.hum_in != other.hum_in
            || self.temp_in != other.temp_in
            || self.hum_out != other.hum_out
            || self.temp_out != other.temp_out
            || self.abs_pressure != other.abs_pressure
            || self.wind_ave != other.wind_ave
            || self.wind_gust != other.wind_gust
            || self.wind_dir != other.wind_dir
            || self.rain != other.rain
            || self.status != other.status
    }
}

/// A log entry stamped with host time (UTC).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// When the station logged (or broadcast) this entry, UTC.
    #[cfg_attr(feature = "serde", serde(with = "crate::timestamp"))]
    pub timestamp: PrimitiveDateTime,
    /// Sensor values.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub sample: Sample,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_station_type_from_str() {
        assert_eq!("1080".parse::<StationType>().unwrap(), StationType::Wh1080);
        assert_eq!("WH3080".parse::<StationType>().unwrap(), StationType::Wh3080);
        assert!(matches!(
            "2080".parse::<StationType>(),
            Err(ParseError::UnknownStationType(_))
        ));
    }

    #[test]
    fn test_station_type_display_round_trip() {
        for station in [StationType::Wh1080, StationType::Wh3080] {
            assert_eq!(station.to_string().parse::<StationType>().unwrap(), station);
        }
    }

    #[test]
    fn test_status_bits() {
        let status = Status::from_bits(0x40);
        assert!(status.lost_connection());
        assert!(!status.rain_overflow());
        assert_eq!(status.to_string(), "lost_connection");

        let status = Status::from_bits(0xC0);
        assert_eq!(status.to_string(), "lost_connection|rain_overflow");
        assert_eq!(Status::default().to_string(), "ok");
    }

    #[test]
    fn test_wind_direction() {
        assert!(WindDirection::new(16).is_none());
        let dir = WindDirection::new(6).unwrap();
        assert_eq!(dir.label(), "SE");
        assert!((dir.degrees() - 135.0).abs() < f64::EPSILON);
        assert!(WindDirection::try_from(0x80).is_err());
    }

    #[test]
    fn test_sensors_differ_ignores_delay() {
        let a = Sample {
            delay: Some(1),
            temp_out: Some(12.5),
            ..Default::default()
        };
        let mut b = a;
        b.delay = Some(2);
        assert!(!a.sensors_differ(&b));

        b.temp_out = Some(12.6);
        assert!(a.sensors_differ(&b));
    }

    #[test]
    fn test_reading_serde_flattens_sample() {
        let reading = Sample {
            temp_out: Some(-3.2),
            wind_dir: WindDirection::new(2),
            ..Default::default()
        }
        .at(datetime!(2024-01-02 03:04:05));

        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["timestamp"], "2024-01-02 03:04:05");
        assert_eq!(json["temp_out"], -3.2);
        assert_eq!(json["wind_dir"], 2);
        assert!(json.get("uv").is_none());

        let back: Reading = serde_json::from_value(json).unwrap();
        assert_eq!(back, reading);
    }
}
