//! Cached copy of the station's fixed block.

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use tracing::warn;

use crate::error::{Error, Result};
use crate::format::{Decoded, Value, decode_field, decode_fields, fixed_format};
use crate::memory::FIXED_BLOCK_LEN;

/// Magic numbers seen at the start of known consoles' fixed blocks.
const KNOWN_MAGIC: [[u8; 2]; 4] = [[0x55, 0xAA], [0xFF, 0xFF], [0x55, 0x55], [0xC4, 0x00]];

/// The 256-byte settings block, kept raw and decoded on demand.
///
/// This is what gets persisted between runs so a restart does not need a
/// full re-read of station memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FixedBlock {
    raw: Vec<u8>,
}

impl FixedBlock {
    /// Wrap raw fixed-block bytes.
    pub fn from_raw(raw: Vec<u8>) -> Result<Self> {
        if raw.len() != FIXED_BLOCK_LEN {
            return Err(Error::decode(format!(
                "fixed block must be {} bytes, got {}",
                FIXED_BLOCK_LEN,
                raw.len()
            )));
        }
        let block = Self { raw };
        if !block.magic_ok() {
            warn!(
                "Unrecognised 'magic number' {:02x} {:02x}",
                block.raw[0], block.raw[1]
            );
        }
        Ok(block)
    }

    /// Raw bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Whether the first two bytes match a known console.
    pub fn magic_ok(&self) -> bool {
        KNOWN_MAGIC.contains(&[self.raw[0], self.raw[1]])
    }

    /// Decode every field at or below `prefix`.
    pub fn decode(&self, prefix: &str) -> Result<Decoded> {
        Ok(decode_fields(&self.raw, fixed_format().select(prefix))?)
    }

    fn value(&self, name: &str) -> Value {
        fixed_format()
            .field(name)
            .and_then(|f| decode_field(&self.raw, f).ok())
            .unwrap_or(Value::Missing)
    }

    /// Logging interval in minutes.
    pub fn read_period(&self) -> Option<u8> {
        self.value("read_period")
            .as_i64()
            .and_then(|v| u8::try_from(v).ok())
            .filter(|&v| v > 0)
    }

    /// Number of valid entries in the circular buffer.
    pub fn data_count(&self) -> u16 {
        self.value("data_count")
            .as_i64()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Address of the entry being filled when the block was read.
    pub fn current_pos(&self) -> Option<u16> {
        self.value("current_pos")
            .as_i64()
            .and_then(|v| u16::try_from(v).ok())
    }

    /// Relative minus absolute pressure, as calibrated on the console.
    pub fn pressure_offset(&self) -> Option<f64> {
        let rel = self.value("rel_pressure").as_f64()?;
        let abs = self.value("abs_pressure").as_f64()?;
        Some(((rel - abs) * 10.0).round() / 10.0)
    }

    /// Console clock at the time the block was read (station local time).
    pub fn date_time(&self) -> Option<PrimitiveDateTime> {
        match self.value("date_time") {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }
}

impl TryFrom<String> for FixedBlock {
    type Error = Error;

    fn try_from(hex: String) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(Error::decode("malformed fixed block hex"));
        }
        let raw = (0..hex.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map_err(|e| Error::decode(format!("fixed block hex: {}", e)))
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::from_raw(raw)
    }
}

impl From<FixedBlock> for String {
    fn from(block: FixedBlock) -> Self {
        block.raw.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::encode_field;

    fn block_with(fields: &[(&str, Value)]) -> FixedBlock {
        let mut raw = vec![0u8; FIXED_BLOCK_LEN];
        raw[0] = 0x55;
        raw[1] = 0xAA;
        for (name, value) in fields {
            let field = fixed_format().field(name).unwrap();
            encode_field(&mut raw, field, value).unwrap();
        }
        FixedBlock::from_raw(raw).unwrap()
    }

    #[test]
    fn test_accessors() {
        let block = block_with(&[
            ("read_period", Value::Int(30)),
            ("data_count", Value::Int(1234)),
            ("current_pos", Value::Int(0x4D30)),
            ("rel_pressure", Value::Float(1013.2)),
            ("abs_pressure", Value::Float(1001.7)),
        ]);
        assert!(block.magic_ok());
        assert_eq!(block.read_period(), Some(30));
        assert_eq!(block.data_count(), 1234);
        assert_eq!(block.current_pos(), Some(0x4D30));
        assert_eq!(block.pressure_offset(), Some(11.5));
    }

    #[test]
    fn test_zero_read_period_is_unknown() {
        let block = block_with(&[("read_period", Value::Int(0))]);
        assert_eq!(block.read_period(), None);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(FixedBlock::from_raw(vec![0; 32]).is_err());
    }

    #[test]
    fn test_decode_subset() {
        let block = block_with(&[("min.temp_out.val", Value::Float(-12.3))]);
        let decoded = block.decode("min.temp_out").unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["min.temp_out.val"], Value::Float(-12.3));
    }

    #[test]
    fn test_serde_round_trip() {
        let block = block_with(&[("read_period", Value::Int(10))]);
        let json = serde_json::to_string(&block).unwrap();
        let back: FixedBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
