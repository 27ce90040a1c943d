//! Row encoding for stored records.
//!
//! Every partition file is headerless CSV: the first column is the record
//! timestamp (`YYYY-MM-DD HH:MM:SS`, UTC), an empty cell is a missing
//! value, and floats are written in their shortest round-trip form.

use std::fmt::Display;
use std::str::FromStr;

use csv::StringRecord;
use time::PrimitiveDateTime;
use wslog_types::{Reading, Sample, Status, TIMESTAMP_FORMAT, WindDirection};

use crate::error::{Error, Result};

/// A value that can live in a [`TimeSeriesStore`](crate::TimeSeriesStore).
pub trait Record: Clone {
    /// Key of this record. Strictly increasing within a store.
    fn timestamp(&self) -> PrimitiveDateTime;

    /// Append this record's columns, timestamp first.
    fn write_row(&self, row: &mut RowWriter);

    /// Decode a record from the columns written by [`Record::write_row`].
    fn read_row(row: &mut RowReader<'_>) -> Result<Self>;
}

/// Builds one CSV row.
#[derive(Debug, Default)]
pub struct RowWriter {
    fields: Vec<String>,
}

impl RowWriter {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamp column.
    pub fn timestamp(&mut self, ts: PrimitiveDateTime) -> &mut Self {
        self.fields.push(format_timestamp(ts));
        self
    }

    /// Append an optional timestamp column.
    pub fn opt_timestamp(&mut self, ts: Option<PrimitiveDateTime>) -> &mut Self {
        self.fields.push(ts.map(format_timestamp).unwrap_or_default());
        self
    }

    /// Append a value column.
    pub fn value<T: Display>(&mut self, value: T) -> &mut Self {
        self.fields.push(value.to_string());
        self
    }

    /// Append a column that is empty when `value` is `None`.
    pub fn opt<T: Display>(&mut self, value: Option<T>) -> &mut Self {
        self.fields
            .push(value.map(|v| v.to_string()).unwrap_or_default());
        self
    }

    /// The finished columns.
    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }
}

/// Walks the columns of one CSV row in order.
///
/// Columns past the end of a short row read as missing, so rows written
/// before a trailing column was added still decode.
pub struct RowReader<'a> {
    row: &'a StringRecord,
    pos: usize,
}

impl<'a> RowReader<'a> {
    /// Start reading at the first column.
    pub fn new(row: &'a StringRecord) -> Self {
        Self { row, pos: 0 }
    }

    fn next_cell(&mut self) -> Option<&'a str> {
        let cell = self.row.get(self.pos);
        self.pos += 1;
        cell.map(str::trim).filter(|c| !c.is_empty())
    }

    /// A required timestamp column.
    pub fn timestamp(&mut self, column: &str) -> Result<PrimitiveDateTime> {
        self.opt_timestamp(column)?
            .ok_or_else(|| Error::InvalidRecord(format!("missing {column}")))
    }

    /// An optional timestamp column.
    pub fn opt_timestamp(&mut self, column: &str) -> Result<Option<PrimitiveDateTime>> {
        self.next_cell()
            .map(|cell| {
                PrimitiveDateTime::parse(cell, TIMESTAMP_FORMAT)
                    .map_err(|e| Error::InvalidTimestamp(format!("{column} {cell:?}: {e}")))
            })
            .transpose()
    }

    /// A required value column.
    pub fn value<T: FromStr>(&mut self, column: &str) -> Result<T> {
        self.opt(column)?
            .ok_or_else(|| Error::InvalidRecord(format!("missing {column}")))
    }

    /// An optional value column.
    pub fn opt<T: FromStr>(&mut self, column: &str) -> Result<Option<T>> {
        self.next_cell()
            .map(|cell| {
                cell.parse()
                    .map_err(|_| Error::InvalidRecord(format!("bad {column} value {cell:?}")))
            })
            .transpose()
    }
}

/// Format a timestamp the way rows store it.
pub fn format_timestamp(ts: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

/// Raw readings, one row per logged entry:
///
/// `idx,delay,hum_in,temp_in,hum_out,temp_out,abs_pressure,wind_ave,wind_gust,wind_dir,rain,status,illuminance,uv`
impl Record for Reading {
    fn timestamp(&self) -> PrimitiveDateTime {
        self.timestamp
    }

    fn write_row(&self, row: &mut RowWriter) {
        let s = &self.sample;
        row.timestamp(self.timestamp)
            .opt(s.delay)
            .opt(s.hum_in)
            .opt(s.temp_in)
            .opt(s.hum_out)
            .opt(s.temp_out)
            .opt(s.abs_pressure)
            .opt(s.wind_ave)
            .opt(s.wind_gust)
            .opt(s.wind_dir.map(|d| d.index()))
            .opt(s.rain)
            .value(s.status.bits())
            .opt(s.illuminance)
            .opt(s.uv);
    }

    fn read_row(row: &mut RowReader<'_>) -> Result<Self> {
        let timestamp = row.timestamp("idx")?;
        let delay = row.opt("delay")?;
        let hum_in = row.opt("hum_in")?;
        let temp_in = row.opt("temp_in")?;
        let hum_out = row.opt("hum_out")?;
        let temp_out = row.opt("temp_out")?;
        let abs_pressure = row.opt("abs_pressure")?;
        let wind_ave = row.opt("wind_ave")?;
        let wind_gust = row.opt("wind_gust")?;
        let wind_dir = row
            .opt::<u8>("wind_dir")?
            .map(|d| {
                WindDirection::new(d)
                    .ok_or_else(|| Error::InvalidRecord(format!("wind_dir {d} out of range")))
            })
            .transpose()?;
        let rain = row.opt("rain")?;
        let status = Status::from_bits(row.opt("status")?.unwrap_or(0));
        let illuminance = row.opt("illuminance")?;
        let uv = row.opt("uv")?;

        Ok(Sample {
            delay,
            hum_in,
            temp_in,
            hum_out,
            temp_out,
            abs_pressure,
            wind_ave,
            wind_gust,
            wind_dir,
            rain,
            status,
            illuminance,
            uv,
        }
        .at(timestamp))
    }
}
