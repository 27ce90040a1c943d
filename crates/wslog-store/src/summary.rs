//! Summary record models.

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use wslog_types::{Reading, WindDirection};

use crate::error::{Error, Result};
use crate::record::{Record, RowReader, RowWriter};

/// A numeric reading field that summaries track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Indoor temperature, °C.
    TempIn,
    /// Outdoor temperature, °C.
    TempOut,
    /// Indoor relative humidity, %.
    HumIn,
    /// Outdoor relative humidity, %.
    HumOut,
    /// Station pressure, hPa.
    AbsPressure,
    /// Sea-level pressure (absolute plus the station offset), hPa.
    RelPressure,
    /// Average wind speed, m/s.
    WindAve,
    /// Wind gust speed, m/s.
    WindGust,
    /// Solar illuminance, lux (WH3080 only).
    Illuminance,
    /// UV index (WH3080 only).
    Uv,
}

impl Field {
    /// Every summarised field, in column order.
    pub const ALL: [Field; 10] = [
        Field::TempIn,
        Field::TempOut,
        Field::HumIn,
        Field::HumOut,
        Field::AbsPressure,
        Field::RelPressure,
        Field::WindAve,
        Field::WindGust,
        Field::Illuminance,
        Field::Uv,
    ];

    /// Column name prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Field::TempIn => "temp_in",
            Field::TempOut => "temp_out",
            Field::HumIn => "hum_in",
            Field::HumOut => "hum_out",
            Field::AbsPressure => "abs_pressure",
            Field::RelPressure => "rel_pressure",
            Field::WindAve => "wind_ave",
            Field::WindGust => "wind_gust",
            Field::Illuminance => "illuminance",
            Field::Uv => "uv",
        }
    }

    /// This field's value in a raw reading.
    ///
    /// Relative pressure is absolute pressure plus `pressure_offset`, and
    /// is missing when no offset is known.
    pub fn value(&self, reading: &Reading, pressure_offset: Option<f64>) -> Option<f64> {
        let s = &reading.sample;
        match self {
            Field::TempIn => s.temp_in,
            Field::TempOut => s.temp_out,
            Field::HumIn => s.hum_in.map(f64::from),
            Field::HumOut => s.hum_out.map(f64::from),
            Field::AbsPressure => s.abs_pressure,
            Field::RelPressure => s.abs_pressure.zip(pressure_offset).map(|(p, o)| p + o),
            Field::WindAve => s.wind_ave,
            Field::WindGust => s.wind_gust,
            Field::Illuminance => s.illuminance,
            Field::Uv => s.uv.map(f64::from),
        }
    }
}

/// Statistics for one field over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    /// Mean of all values.
    pub ave: Option<f64>,
    /// Smallest value; the earliest wins ties.
    pub min: Option<f64>,
    /// When `min` was seen.
    #[serde(with = "wslog_types::timestamp::option", default)]
    pub min_t: Option<PrimitiveDateTime>,
    /// Largest value; the earliest wins ties.
    pub max: Option<f64>,
    /// When `max` was seen.
    #[serde(with = "wslog_types::timestamp::option", default)]
    pub max_t: Option<PrimitiveDateTime>,
    /// Most recent value.
    pub last: Option<f64>,
    /// When `last` was seen.
    #[serde(with = "wslog_types::timestamp::option", default)]
    pub last_t: Option<PrimitiveDateTime>,
    /// Number of values.
    pub count: u32,
}

impl FieldStats {
    fn write_row(&self, row: &mut RowWriter) {
        row.opt(self.ave)
            .opt(self.min)
            .opt_timestamp(self.min_t)
            .opt(self.max)
            .opt_timestamp(self.max_t)
            .opt(self.last)
            .opt_timestamp(self.last_t)
            .value(self.count);
    }

    fn read_row(row: &mut RowReader<'_>, field: Field) -> Result<Self> {
        let name = field.name();
        Ok(Self {
            ave: row.opt(name)?,
            min: row.opt(name)?,
            min_t: row.opt_timestamp(name)?,
            max: row.opt(name)?,
            max_t: row.opt_timestamp(name)?,
            last: row.opt(name)?,
            last_t: row.opt_timestamp(name)?,
            count: row.opt(name)?.unwrap_or(0),
        })
    }
}

/// Per-field statistics for a window.
///
/// One member per [`Field`], named and ordered as [`Field::ALL`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryFields {
    /// See [`Field::TempIn`].
    pub temp_in: FieldStats,
    /// See [`Field::TempOut`].
    pub temp_out: FieldStats,
    /// See [`Field::HumIn`].
    pub hum_in: FieldStats,
    /// See [`Field::HumOut`].
    pub hum_out: FieldStats,
    /// See [`Field::AbsPressure`].
    pub abs_pressure: FieldStats,
    /// See [`Field::RelPressure`].
    pub rel_pressure: FieldStats,
    /// See [`Field::WindAve`].
    pub wind_ave: FieldStats,
    /// See [`Field::WindGust`].
    pub wind_gust: FieldStats,
    /// See [`Field::Illuminance`].
    pub illuminance: FieldStats,
    /// See [`Field::Uv`].
    pub uv: FieldStats,
}

impl SummaryFields {
    /// Statistics for `field`.
    pub fn get(&self, field: Field) -> &FieldStats {
        match field {
            Field::TempIn => &self.temp_in,
            Field::TempOut => &self.temp_out,
            Field::HumIn => &self.hum_in,
            Field::HumOut => &self.hum_out,
            Field::AbsPressure => &self.abs_pressure,
            Field::RelPressure => &self.rel_pressure,
            Field::WindAve => &self.wind_ave,
            Field::WindGust => &self.wind_gust,
            Field::Illuminance => &self.illuminance,
            Field::Uv => &self.uv,
        }
    }

    /// Mutable statistics for `field`.
    pub fn get_mut(&mut self, field: Field) -> &mut FieldStats {
        match field {
            Field::TempIn => &mut self.temp_in,
            Field::TempOut => &mut self.temp_out,
            Field::HumIn => &mut self.hum_in,
            Field::HumOut => &mut self.hum_out,
            Field::AbsPressure => &mut self.abs_pressure,
            Field::RelPressure => &mut self.rel_pressure,
            Field::WindAve => &mut self.wind_ave,
            Field::WindGust => &mut self.wind_gust,
            Field::Illuminance => &mut self.illuminance,
            Field::Uv => &mut self.uv,
        }
    }

    fn write_row(&self, row: &mut RowWriter) {
        for field in Field::ALL {
            self.get(field).write_row(row);
        }
    }

    fn read_row(row: &mut RowReader<'_>) -> Result<Self> {
        let mut fields = Self::default();
        for field in Field::ALL {
            *fields.get_mut(field) = FieldStats::read_row(row, field)?;
        }
        Ok(fields)
    }
}

/// An hourly or daily summary.
///
/// Keyed by the end of its window, so the newest summary is the last row
/// of the newest partition. Columns are `idx,start,count`, then for each
/// [`Field`] `ave,min,min_t,max,max_t,last,last_t,count`, then
/// `wind_dir,rain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// End of the window (exclusive), UTC.
    #[serde(with = "wslog_types::timestamp")]
    pub idx: PrimitiveDateTime,
    /// Start of the window, UTC.
    #[serde(with = "wslog_types::timestamp")]
    pub start: PrimitiveDateTime,
    /// Raw records inside the window.
    pub count: u32,
    /// Field statistics.
    #[serde(flatten)]
    pub fields: SummaryFields,
    /// Wind-speed weighted mean direction.
    pub wind_dir: Option<WindDirection>,
    /// Rainfall in mm.
    pub rain: f64,
}

impl Record for SummaryRecord {
    fn timestamp(&self) -> PrimitiveDateTime {
        self.idx
    }

    fn write_row(&self, row: &mut RowWriter) {
        row.timestamp(self.idx).timestamp(self.start).value(self.count);
        self.fields.write_row(row);
        row.opt(self.wind_dir.map(|d| d.index())).value(self.rain);
    }

    fn read_row(row: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self {
            idx: row.timestamp("idx")?,
            start: row.timestamp("start")?,
            count: row.value("count")?,
            fields: SummaryFields::read_row(row)?,
            wind_dir: read_wind_dir(row)?,
            rain: row.opt("rain")?.unwrap_or(0.0),
        })
    }
}

/// A monthly summary built from daily summaries.
///
/// Columns are `idx,start,days`, the per-field block of
/// [`SummaryRecord`], then
/// `temp_out_min_ave,temp_out_max_ave,wind_dir,rain,rain_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRecord {
    /// End of the month window (exclusive), UTC.
    #[serde(with = "wslog_types::timestamp")]
    pub idx: PrimitiveDateTime,
    /// Start of the month window, UTC.
    #[serde(with = "wslog_types::timestamp")]
    pub start: PrimitiveDateTime,
    /// Days with at least one raw record.
    pub days: u32,
    /// Field statistics over the whole month.
    #[serde(flatten)]
    pub fields: SummaryFields,
    /// Mean of the daily minimum outdoor temperatures.
    pub temp_out_min_ave: Option<f64>,
    /// Mean of the daily maximum outdoor temperatures.
    pub temp_out_max_ave: Option<f64>,
    /// Wind-speed weighted mean direction.
    pub wind_dir: Option<WindDirection>,
    /// Rainfall in mm.
    pub rain: f64,
    /// Days whose rainfall exceeded the rain-day threshold.
    pub rain_days: u32,
}

impl Record for MonthlyRecord {
    fn timestamp(&self) -> PrimitiveDateTime {
        self.idx
    }

    fn write_row(&self, row: &mut RowWriter) {
        row.timestamp(self.idx).timestamp(self.start).value(self.days);
        self.fields.write_row(row);
        row.opt(self.temp_out_min_ave)
            .opt(self.temp_out_max_ave)
            .opt(self.wind_dir.map(|d| d.index()))
            .value(self.rain)
            .value(self.rain_days);
    }

    fn read_row(row: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self {
            idx: row.timestamp("idx")?,
            start: row.timestamp("start")?,
            days: row.value("days")?,
            fields: SummaryFields::read_row(row)?,
            temp_out_min_ave: row.opt("temp_out_min_ave")?,
            temp_out_max_ave: row.opt("temp_out_max_ave")?,
            wind_dir: read_wind_dir(row)?,
            rain: row.opt("rain")?.unwrap_or(0.0),
            rain_days: row.opt("rain_days")?.unwrap_or(0),
        })
    }
}

fn read_wind_dir(row: &mut RowReader<'_>) -> Result<Option<WindDirection>> {
    row.opt::<u8>("wind_dir")?
        .map(|d| {
            WindDirection::new(d)
                .ok_or_else(|| Error::InvalidRecord(format!("wind_dir {d} out of range")))
        })
        .transpose()
}
