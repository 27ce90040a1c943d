//! Declarative memory layouts and the generic field decoder.
//!
//! Every field the station exposes is described once by a
//! [`FieldDescriptor`] in an immutable table. [`decode_fields`] walks a
//! table (or a filtered view of one) and produces named [`Value`]s;
//! [`encode_field`] is the exact inverse and is used to build synthetic
//! memory images.
//!
//! Nested groups in the fixed block use dotted names such as
//! `max.temp_out.val`. [`FormatTable::select`] returns the subset under a
//! prefix, and [`FormatTable::span`] tells the caller which bytes that
//! subset needs so only the covering blocks are fetched.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use time::{Date, Month, PrimitiveDateTime, Time};
use wslog_types::{ParseError, ParseResult, Sample, StationType, Status, WindDirection};

/// How the raw bytes of a field are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Unsigned byte, `0xFF` = missing.
    U8,
    /// Sign-magnitude byte (bit 7 = negative), `0xFF` = missing.
    S8,
    /// Unsigned little-endian short, `0xFFFF` = missing.
    U16,
    /// Sign-magnitude little-endian short (bit 15 = negative), `0xFFFF` = missing.
    S16,
    /// Unsigned little-endian 24-bit value, `0xFFFFFF` = missing.
    U24,
    /// Unsigned byte extended by a nibble of another byte to 12 bits.
    U8Nibble {
        /// Offset of the byte holding the extension nibble.
        nibble_at: usize,
        /// Whether the extension is the high nibble.
        high: bool,
    },
    /// Unsigned short extended by a nibble of another byte to 20 bits.
    U16Nibble {
        /// Offset of the byte holding the extension nibble.
        nibble_at: usize,
        /// Whether the extension is the high nibble.
        high: bool,
    },
    /// Compass index byte; bit 7 set means the sensor reported no direction.
    WindDir,
    /// Bit-field byte.
    Bits,
    /// Two BCD bytes `hh mm`.
    BcdTime,
    /// Five BCD bytes `yy mm dd hh mm`, years counted from 2000.
    BcdDateTime,
}

impl Encoding {
    fn base_width(&self) -> usize {
        match self {
            Encoding::U8 | Encoding::S8 | Encoding::U8Nibble { .. } => 1,
            Encoding::WindDir | Encoding::Bits => 1,
            Encoding::U16 | Encoding::S16 | Encoding::U16Nibble { .. } | Encoding::BcdTime => 2,
            Encoding::U24 => 3,
            Encoding::BcdDateTime => 5,
        }
    }
}

/// Multiplier turning a raw integer into physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Raw value is used as-is.
    Unit,
    /// Raw value counts `n` tenths of the unit (e.g. rain tips of 0.3 mm).
    Tenths(u8),
}

/// Description of one field in a memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name; nested groups are separated by dots.
    pub name: &'static str,
    /// Byte offset from the start of the layout.
    pub offset: usize,
    /// Raw encoding.
    pub encoding: Encoding,
    /// Scale applied to numeric encodings.
    pub scale: Scale,
}

impl FieldDescriptor {
    const fn new(name: &'static str, offset: usize, encoding: Encoding) -> Self {
        Self {
            name,
            offset,
            encoding,
            scale: Scale::Unit,
        }
    }

    const fn scaled(name: &'static str, offset: usize, encoding: Encoding, tenths: u8) -> Self {
        Self {
            name,
            offset,
            encoding,
            scale: Scale::Tenths(tenths),
        }
    }

    /// Byte range this field occupies, including any extension nibble.
    pub fn bytes(&self) -> Range<usize> {
        let mut end = self.offset + self.encoding.base_width();
        if let Encoding::U8Nibble { nibble_at, .. } | Encoding::U16Nibble { nibble_at, .. } =
            self.encoding
        {
            end = end.max(nibble_at + 1);
        }
        let start = match self.encoding {
            Encoding::U8Nibble { nibble_at, .. } | Encoding::U16Nibble { nibble_at, .. } => {
                self.offset.min(nibble_at)
            }
            _ => self.offset,
        };
        start..end
    }

    fn matches(&self, prefix: &str) -> bool {
        prefix.is_empty()
            || self.name == prefix
            || (self.name.starts_with(prefix) && self.name[prefix.len()..].starts_with('.'))
    }
}

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Unscaled integer.
    Int(i64),
    /// Scaled physical value.
    Float(f64),
    /// Bit-field byte.
    Bits(u8),
    /// Time of day.
    Time(Time),
    /// Station-local date and time.
    DateTime(PrimitiveDateTime),
    /// Sentinel or invalid raw value.
    Missing,
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int(v) => Some(v as f64),
            Value::Float(v) => Some(v),
            Value::Bits(v) => Some(f64::from(v)),
            _ => None,
        }
    }

    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Bits(v) => Some(i64::from(v)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bits(v) => write!(f, "{:#010b}", v),
            Value::Time(t) => write!(f, "{:02}:{:02}", t.hour(), t.minute()),
            Value::DateTime(dt) => write!(
                f,
                "{:04}-{:02}-{:02} {:02}:{:02}",
                dt.year(),
                u8::from(dt.month()),
                dt.day(),
                dt.hour(),
                dt.minute()
            ),
            Value::Missing => write!(f, "-"),
        }
    }
}

/// Decoded fields keyed by descriptor name.
pub type Decoded = BTreeMap<&'static str, Value>;

/// An immutable table of field descriptors.
#[derive(Debug, Clone, Copy)]
pub struct FormatTable {
    fields: &'static [FieldDescriptor],
}

impl FormatTable {
    /// All descriptors in the table.
    pub fn fields(&self) -> &'static [FieldDescriptor] {
        self.fields
    }

    /// Look up a single descriptor by its full name.
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Descriptors at or below `prefix` (an empty prefix selects everything).
    pub fn select<'a>(
        &self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'static FieldDescriptor> + use<'a> {
        let fields: &'static [FieldDescriptor] = self.fields;
        fields.iter().filter(move |f| f.matches(prefix))
    }

    /// Smallest byte range covering every descriptor under `prefix`.
    pub fn span(&self, prefix: &str) -> Option<Range<usize>> {
        self.select(prefix)
            .map(|f| f.bytes())
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))
    }
}

fn require(buf: &[u8], range: Range<usize>) -> ParseResult<()> {
    if buf.len() < range.end {
        return Err(ParseError::InsufficientBytes {
            expected: range.end,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn bcd(byte: u8) -> u8 {
    (byte >> 4) * 10 + (byte & 0x0F)
}

fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

fn scaled(raw: i64, scale: Scale) -> Value {
    match scale {
        Scale::Unit => Value::Int(raw),
        Scale::Tenths(n) => Value::Float((raw * i64::from(n)) as f64 / 10.0),
    }
}

fn unscaled(value: &Value, scale: Scale) -> Option<i64> {
    match (*value, scale) {
        (Value::Int(v), _) => Some(v),
        (Value::Bits(v), _) => Some(i64::from(v)),
        (Value::Float(v), Scale::Tenths(n)) => Some((v * 10.0 / f64::from(n)).round() as i64),
        (Value::Float(v), Scale::Unit) => Some(v.round() as i64),
        _ => None,
    }
}

fn nibble(buf: &[u8], at: usize, high: bool, shift: u32) -> i64 {
    if high {
        i64::from(buf[at] & 0xF0) << (shift - 4)
    } else {
        i64::from(buf[at] & 0x0F) << shift
    }
}

/// Decode a single field from `buf`.
pub fn decode_field(buf: &[u8], field: &FieldDescriptor) -> ParseResult<Value> {
    require(buf, field.bytes())?;
    let at = field.offset;
    let u16_at = |pos: usize| i64::from(buf[pos]) | (i64::from(buf[pos + 1]) << 8);

    let value = match field.encoding {
        Encoding::U8 => match buf[at] {
            0xFF => Value::Missing,
            v => scaled(i64::from(v), field.scale),
        },
        Encoding::S8 => match buf[at] {
            0xFF => Value::Missing,
            v if v >= 0x80 => scaled(0x80 - i64::from(v), field.scale),
            v => scaled(i64::from(v), field.scale),
        },
        Encoding::U16 => match u16_at(at) {
            0xFFFF => Value::Missing,
            v => scaled(v, field.scale),
        },
        Encoding::S16 => match u16_at(at) {
            0xFFFF => Value::Missing,
            v if v >= 0x8000 => scaled(0x8000 - v, field.scale),
            v => scaled(v, field.scale),
        },
        Encoding::U24 => match u16_at(at) | (i64::from(buf[at + 2]) << 16) {
            0xFF_FFFF => Value::Missing,
            v => scaled(v, field.scale),
        },
        Encoding::U8Nibble { nibble_at, high } => match buf[at] {
            0xFF => Value::Missing,
            v => scaled(i64::from(v) + nibble(buf, nibble_at, high, 8), field.scale),
        },
        Encoding::U16Nibble { nibble_at, high } => match u16_at(at) {
            0xFFFF => Value::Missing,
            v => scaled(v + nibble(buf, nibble_at, high, 16), field.scale),
        },
        Encoding::WindDir => match buf[at] {
            v if v & 0x80 != 0 => Value::Missing,
            v => Value::Int(i64::from(v)),
        },
        Encoding::Bits => Value::Bits(buf[at]),
        Encoding::BcdTime => match Time::from_hms(bcd(buf[at]), bcd(buf[at + 1]), 0) {
            Ok(t) => Value::Time(t),
            Err(_) => Value::Missing,
        },
        Encoding::BcdDateTime => {
            let date = Month::try_from(bcd(buf[at + 1])).ok().and_then(|month| {
                Date::from_calendar_date(2000 + i32::from(bcd(buf[at])), month, bcd(buf[at + 2]))
                    .ok()
            });
            let time = Time::from_hms(bcd(buf[at + 3]), bcd(buf[at + 4]), 0).ok();
            match (date, time) {
                (Some(d), Some(t)) => Value::DateTime(PrimitiveDateTime::new(d, t)),
                _ => Value::Missing,
            }
        }
    };
    Ok(value)
}

/// Decode every field of `fields` from `buf`.
pub fn decode_fields<'a, I>(buf: &[u8], fields: I) -> ParseResult<Decoded>
where
    I: IntoIterator<Item = &'a FieldDescriptor>,
{
    fields
        .into_iter()
        .map(|f| decode_field(buf, f).map(|v| (f.name, v)))
        .collect()
}

/// Write `value` into `buf` using the field's encoding.
///
/// `Value::Missing` writes the encoding's sentinel.
pub fn encode_field(buf: &mut [u8], field: &FieldDescriptor, value: &Value) -> ParseResult<()> {
    require(buf, field.bytes())?;
    let at = field.offset;
    let invalid = || {
        ParseError::InvalidData(format!(
            "cannot encode {:?} as {:?} for '{}'",
            value, field.encoding, field.name
        ))
    };
    let raw = unscaled(value, field.scale);

    match field.encoding {
        Encoding::U8 | Encoding::Bits => {
            buf[at] = match raw {
                Some(v) => u8::try_from(v).map_err(|_| invalid())?,
                None => 0xFF,
            };
        }
        Encoding::S8 => {
            buf[at] = match raw {
                Some(v) if (-0x7E..0).contains(&v) => (0x80 - v) as u8,
                Some(v) if (0..=0x7F).contains(&v) => v as u8,
                Some(_) => return Err(invalid()),
                None => 0xFF,
            };
        }
        Encoding::U16 | Encoding::S16 => {
            let encoded = match (raw, field.encoding) {
                (None, _) => 0xFFFF,
                (Some(v), Encoding::S16) if (-0x7FFE..0).contains(&v) => 0x8000 - v,
                (Some(v), Encoding::S16) if (0..0x8000).contains(&v) => v,
                (Some(v), Encoding::U16) if (0..0xFFFF).contains(&v) => v,
                _ => return Err(invalid()),
            };
            buf[at] = (encoded & 0xFF) as u8;
            buf[at + 1] = (encoded >> 8) as u8;
        }
        Encoding::U24 => {
            let encoded = match raw {
                Some(v) if (0..0xFF_FFFF).contains(&v) => v,
                Some(_) => return Err(invalid()),
                None => 0xFF_FFFF,
            };
            buf[at] = (encoded & 0xFF) as u8;
            buf[at + 1] = ((encoded >> 8) & 0xFF) as u8;
            buf[at + 2] = (encoded >> 16) as u8;
        }
        Encoding::U8Nibble { nibble_at, high } => {
            let (base, ext) = match raw {
                Some(v) if (0..0x1000).contains(&v) && (v & 0xFF) != 0xFF => {
                    ((v & 0xFF) as u8, (v >> 8) as u8)
                }
                Some(_) => return Err(invalid()),
                None => (0xFF, 0),
            };
            buf[at] = base;
            buf[nibble_at] = if high {
                (buf[nibble_at] & 0x0F) | (ext << 4)
            } else {
                (buf[nibble_at] & 0xF0) | ext
            };
        }
        Encoding::U16Nibble { nibble_at, high } => {
            let (base, ext) = match raw {
                Some(v) if (0..0x10_0000).contains(&v) && (v & 0xFFFF) != 0xFFFF => {
                    (v & 0xFFFF, (v >> 16) as u8)
                }
                Some(_) => return Err(invalid()),
                None => (0xFFFF, 0),
            };
            buf[at] = (base & 0xFF) as u8;
            buf[at + 1] = (base >> 8) as u8;
            buf[nibble_at] = if high {
                (buf[nibble_at] & 0x0F) | (ext << 4)
            } else {
                (buf[nibble_at] & 0xF0) | ext
            };
        }
        Encoding::WindDir => {
            buf[at] = match raw {
                Some(v) if (0..16).contains(&v) => v as u8,
                Some(_) => return Err(invalid()),
                None => 0x80,
            };
        }
        Encoding::BcdTime => match value {
            Value::Time(t) => {
                buf[at] = to_bcd(t.hour());
                buf[at + 1] = to_bcd(t.minute());
            }
            Value::Missing => buf[at..at + 2].fill(0xFF),
            _ => return Err(invalid()),
        },
        Encoding::BcdDateTime => match value {
            Value::DateTime(dt) if (2000..2100).contains(&dt.year()) => {
                buf[at] = to_bcd((dt.year() - 2000) as u8);
                buf[at + 1] = to_bcd(u8::from(dt.month()));
                buf[at + 2] = to_bcd(dt.day());
                buf[at + 3] = to_bcd(dt.hour());
                buf[at + 4] = to_bcd(dt.minute());
            }
            Value::Missing => buf[at..at + 5].fill(0xFF),
            _ => return Err(invalid()),
        },
    }
    Ok(())
}

// ==================== Log entry layouts ====================

const WH1080_FIELDS: [FieldDescriptor; 11] = [
    FieldDescriptor::new("delay", 0, Encoding::U8),
    FieldDescriptor::new("hum_in", 1, Encoding::U8),
    FieldDescriptor::scaled("temp_in", 2, Encoding::S16, 1),
    FieldDescriptor::new("hum_out", 4, Encoding::U8),
    FieldDescriptor::scaled("temp_out", 5, Encoding::S16, 1),
    FieldDescriptor::scaled("abs_pressure", 7, Encoding::U16, 1),
    FieldDescriptor::scaled(
        "wind_ave",
        9,
        Encoding::U8Nibble {
            nibble_at: 11,
            high: false,
        },
        1,
    ),
    FieldDescriptor::scaled(
        "wind_gust",
        10,
        Encoding::U8Nibble {
            nibble_at: 11,
            high: true,
        },
        1,
    ),
    FieldDescriptor::new("wind_dir", 12, Encoding::WindDir),
    FieldDescriptor::scaled("rain", 13, Encoding::U16, 3),
    FieldDescriptor::new("status", 15, Encoding::Bits),
];

static READING_1080: [FieldDescriptor; 11] = WH1080_FIELDS;

static READING_3080: [FieldDescriptor; 13] = [
    WH1080_FIELDS[0],
    WH1080_FIELDS[1],
    WH1080_FIELDS[2],
    WH1080_FIELDS[3],
    WH1080_FIELDS[4],
    WH1080_FIELDS[5],
    WH1080_FIELDS[6],
    WH1080_FIELDS[7],
    WH1080_FIELDS[8],
    WH1080_FIELDS[9],
    WH1080_FIELDS[10],
    FieldDescriptor::scaled("illuminance", 16, Encoding::U24, 1),
    FieldDescriptor::new("uv", 19, Encoding::U8),
];

/// Log entry layout for a station class.
pub fn reading_format(station: StationType) -> FormatTable {
    match station {
        StationType::Wh1080 => FormatTable {
            fields: &READING_1080,
        },
        StationType::Wh3080 => FormatTable {
            fields: &READING_3080,
        },
    }
}

/// Decode one circular-buffer entry into a [`Sample`].
pub fn decode_sample(buf: &[u8], station: StationType) -> ParseResult<Sample> {
    require(buf, 0..station.reading_len())?;
    let mut sample = Sample::default();
    for field in reading_format(station).fields() {
        let value = decode_field(buf, field)?;
        let float = value.as_f64();
        let byte = value.as_i64().and_then(|v| u8::try_from(v).ok());
        match field.name {
            "delay" => sample.delay = byte,
            "hum_in" => sample.hum_in = byte,
            "temp_in" => sample.temp_in = float,
            "hum_out" => sample.hum_out = byte,
            "temp_out" => sample.temp_out = float,
            "abs_pressure" => sample.abs_pressure = float,
            "wind_ave" => sample.wind_ave = float,
            "wind_gust" => sample.wind_gust = float,
            "wind_dir" => sample.wind_dir = byte.and_then(WindDirection::new),
            "rain" => sample.rain = float,
            "status" => sample.status = Status::from_bits(byte.unwrap_or_default()),
            "illuminance" => sample.illuminance = float,
            "uv" => sample.uv = byte,
            _ => {}
        }
    }
    Ok(sample)
}

/// Encode a [`Sample`] as one circular-buffer entry.
pub fn encode_sample(sample: &Sample, station: StationType) -> ParseResult<Vec<u8>> {
    let mut buf = vec![0u8; station.reading_len()];
    let int = |v: Option<u8>| v.map_or(Value::Missing, |v| Value::Int(i64::from(v)));
    let float = |v: Option<f64>| v.map_or(Value::Missing, Value::Float);
    for field in reading_format(station).fields() {
        let value = match field.name {
            "delay" => int(sample.delay),
            "hum_in" => int(sample.hum_in),
            "temp_in" => float(sample.temp_in),
            "hum_out" => int(sample.hum_out),
            "temp_out" => float(sample.temp_out),
            "abs_pressure" => float(sample.abs_pressure),
            "wind_ave" => float(sample.wind_ave),
            "wind_gust" => float(sample.wind_gust),
            "wind_dir" => int(sample.wind_dir.map(u8::from)),
            "rain" => float(sample.rain),
            "status" => Value::Bits(sample.status.bits()),
            "illuminance" => float(sample.illuminance),
            "uv" => int(sample.uv),
            _ => Value::Missing,
        };
        encode_field(&mut buf, field, &value)?;
    }
    Ok(buf)
}

// ==================== Fixed block layout ====================

const fn extreme(
    val: &'static str,
    val_offset: usize,
    encoding: Encoding,
    scale: Scale,
    date: &'static str,
    date_offset: usize,
) -> [FieldDescriptor; 2] {
    [
        FieldDescriptor {
            name: val,
            offset: val_offset,
            encoding,
            scale,
        },
        FieldDescriptor::new(date, date_offset, Encoding::BcdDateTime),
    ]
}

const fn flatten<const N: usize, const M: usize>(
    pairs: [[FieldDescriptor; 2]; N],
) -> [FieldDescriptor; M] {
    let mut out = [FieldDescriptor::new("", 0, Encoding::U8); M];
    let mut i = 0;
    while i < N {
        out[2 * i] = pairs[i][0];
        out[2 * i + 1] = pairs[i][1];
        i += 1;
    }
    out
}

const FIXED_SCALARS: [FieldDescriptor; 49] = [
    FieldDescriptor::new("magic_0", 0, Encoding::U8),
    FieldDescriptor::new("magic_1", 1, Encoding::U8),
    FieldDescriptor::new("rain_factor_raw", 2, Encoding::U16),
    FieldDescriptor::new("wind_factor_raw", 4, Encoding::U16),
    FieldDescriptor::new("read_period", 16, Encoding::U8),
    FieldDescriptor::new("settings_1", 17, Encoding::Bits),
    FieldDescriptor::new("settings_2", 18, Encoding::Bits),
    FieldDescriptor::new("display_1", 19, Encoding::Bits),
    FieldDescriptor::new("display_2", 20, Encoding::Bits),
    FieldDescriptor::new("alarm_1", 21, Encoding::Bits),
    FieldDescriptor::new("alarm_2", 22, Encoding::Bits),
    FieldDescriptor::new("alarm_3", 23, Encoding::Bits),
    FieldDescriptor::new("timezone", 24, Encoding::S8),
    FieldDescriptor::new("unknown_01", 25, Encoding::U8),
    FieldDescriptor::new("data_changed", 26, Encoding::U8),
    FieldDescriptor::new("data_count", 27, Encoding::U16),
    FieldDescriptor::new("display_3", 29, Encoding::Bits),
    FieldDescriptor::new("current_pos", 30, Encoding::U16),
    FieldDescriptor::scaled("rel_pressure", 32, Encoding::U16, 1),
    FieldDescriptor::scaled("abs_pressure", 34, Encoding::U16, 1),
    FieldDescriptor::scaled("lux_wm2_coeff", 36, Encoding::U16, 1),
    FieldDescriptor::new("date_time", 43, Encoding::BcdDateTime),
    FieldDescriptor::new("alarm.hum_in.hi", 48, Encoding::U8),
    FieldDescriptor::new("alarm.hum_in.lo", 49, Encoding::U8),
    FieldDescriptor::scaled("alarm.temp_in.hi", 50, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.temp_in.lo", 52, Encoding::S16, 1),
    FieldDescriptor::new("alarm.hum_out.hi", 54, Encoding::U8),
    FieldDescriptor::new("alarm.hum_out.lo", 55, Encoding::U8),
    FieldDescriptor::scaled("alarm.temp_out.hi", 56, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.temp_out.lo", 58, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.windchill.hi", 60, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.windchill.lo", 62, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.dewpoint.hi", 64, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.dewpoint.lo", 66, Encoding::S16, 1),
    FieldDescriptor::scaled("alarm.abs_pressure.hi", 68, Encoding::U16, 1),
    FieldDescriptor::scaled("alarm.abs_pressure.lo", 70, Encoding::U16, 1),
    FieldDescriptor::scaled("alarm.rel_pressure.hi", 72, Encoding::U16, 1),
    FieldDescriptor::scaled("alarm.rel_pressure.lo", 74, Encoding::U16, 1),
    FieldDescriptor::new("alarm.wind_ave.bft", 76, Encoding::U8),
    FieldDescriptor::scaled("alarm.wind_ave.ms", 77, Encoding::U8, 1),
    FieldDescriptor::new("alarm.wind_gust.bft", 79, Encoding::U8),
    FieldDescriptor::scaled("alarm.wind_gust.ms", 80, Encoding::U8, 1),
    FieldDescriptor::new("alarm.wind_dir", 82, Encoding::WindDir),
    FieldDescriptor::scaled("alarm.rain.hour", 83, Encoding::U16, 3),
    FieldDescriptor::scaled("alarm.rain.day", 85, Encoding::U16, 3),
    FieldDescriptor::new("alarm.time", 87, Encoding::BcdTime),
    FieldDescriptor::scaled("alarm.illuminance", 89, Encoding::U24, 1),
    FieldDescriptor::new("alarm.uv", 92, Encoding::U8),
    FieldDescriptor::new("unknown_18", 97, Encoding::U8),
];

const FIXED_EXTREMES: [FieldDescriptor; 46] = flatten([
    extreme("max.uv.val", 93, Encoding::U8, Scale::Unit, "max.uv.date", 6),
    extreme("max.illuminance.val", 94, Encoding::U24, Scale::Tenths(1), "max.illuminance.date", 11),
    extreme("max.hum_in.val", 98, Encoding::U8, Scale::Unit, "max.hum_in.date", 141),
    extreme("max.hum_out.val", 100, Encoding::U8, Scale::Unit, "max.hum_out.date", 151),
    extreme("max.temp_in.val", 102, Encoding::S16, Scale::Tenths(1), "max.temp_in.date", 161),
    extreme("max.temp_out.val", 106, Encoding::S16, Scale::Tenths(1), "max.temp_out.date", 171),
    extreme("max.windchill.val", 110, Encoding::S16, Scale::Tenths(1), "max.windchill.date", 181),
    extreme("max.dewpoint.val", 114, Encoding::S16, Scale::Tenths(1), "max.dewpoint.date", 191),
    extreme("max.abs_pressure.val", 118, Encoding::U16, Scale::Tenths(1), "max.abs_pressure.date", 201),
    extreme("max.rel_pressure.val", 122, Encoding::U16, Scale::Tenths(1), "max.rel_pressure.date", 211),
    extreme("max.wind_ave.val", 126, Encoding::U16, Scale::Tenths(1), "max.wind_ave.date", 221),
    extreme("max.wind_gust.val", 128, Encoding::U16, Scale::Tenths(1), "max.wind_gust.date", 226),
    extreme("max.rain.hour.val", 130, Encoding::U16, Scale::Tenths(3), "max.rain.hour.date", 231),
    extreme("max.rain.day.val", 132, Encoding::U16, Scale::Tenths(3), "max.rain.day.date", 236),
    extreme("max.rain.week.val", 134, Encoding::U16, Scale::Tenths(3), "max.rain.week.date", 241),
    extreme(
        "max.rain.month.val",
        136,
        Encoding::U16Nibble {
            nibble_at: 140,
            high: true,
        },
        Scale::Tenths(3),
        "max.rain.month.date",
        246,
    ),
    extreme(
        "max.rain.total.val",
        138,
        Encoding::U16Nibble {
            nibble_at: 140,
            high: false,
        },
        Scale::Tenths(3),
        "max.rain.total.date",
        251,
    ),
    extreme("min.hum_in.val", 99, Encoding::U8, Scale::Unit, "min.hum_in.date", 146),
    extreme("min.hum_out.val", 101, Encoding::U8, Scale::Unit, "min.hum_out.date", 156),
    extreme("min.temp_in.val", 104, Encoding::S16, Scale::Tenths(1), "min.temp_in.date", 166),
    extreme("min.temp_out.val", 108, Encoding::S16, Scale::Tenths(1), "min.temp_out.date", 176),
    extreme("min.windchill.val", 112, Encoding::S16, Scale::Tenths(1), "min.windchill.date", 186),
    extreme("min.dewpoint.val", 116, Encoding::S16, Scale::Tenths(1), "min.dewpoint.date", 196),
]);

const fn concat<const A: usize, const B: usize, const N: usize>(
    a: [FieldDescriptor; A],
    b: [FieldDescriptor; B],
) -> [FieldDescriptor; N] {
    let mut out = [FieldDescriptor::new("", 0, Encoding::U8); N];
    let mut i = 0;
    while i < A {
        out[i] = a[i];
        i += 1;
    }
    let mut j = 0;
    while j < B {
        out[A + j] = b[j];
        j += 1;
    }
    out
}

static FIXED_BLOCK: [FieldDescriptor; 95] = concat(FIXED_SCALARS, FIXED_EXTREMES);

/// Layout of the 256-byte fixed block (settings, alarms and extremes).
pub fn fixed_format() -> FormatTable {
    FormatTable {
        fields: &FIXED_BLOCK,
    }
}
