//! In-memory station implementation for testing and simulation.
//!
//! [`MockStation`] holds a complete 64 KiB memory image and implements
//! [`StationTransport`], so the decoder and acquisition state machine can
//! run without hardware.
//!
//! # Features
//!
//! - **Memory image**: fixed block and circular buffer laid out like a real console
//! - **Logging**: [`MockStation::log_sample`] completes the current entry and advances the pointer
//! - **Failure injection**: fail a number of transactions or every transaction
//! - **Latency simulation**: add artificial delays to block reads

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use wslog_types::{Sample, StationType};

use crate::error::{Error, Result};
use crate::format::{Value, encode_field, encode_sample, fixed_format};
use crate::memory::{BLOCK_LEN, DATA_START, MEMORY_END, capacity, inc_ptr};
use crate::transport::StationTransport;

/// A simulated weather station console.
///
/// # Example
///
/// ```
/// use wslog_core::{MockStation, Station};
/// use wslog_types::StationType;
///
/// #[tokio::main]
/// async fn main() {
///     let mock = MockStation::new(StationType::Wh1080);
///     mock.set_read_period(5).await;
///
///     let mut station = Station::new(mock, StationType::Wh1080);
///     let fixed = station.fixed_block(true).await.unwrap();
///     assert_eq!(fixed.read_period(), Some(5));
/// }
/// ```
pub struct MockStation {
    station_type: StationType,
    memory: RwLock<Vec<u8>>,
    read_count: AtomicU32,
    write_count: AtomicU32,
    should_fail: AtomicBool,
    /// Number of transactions to fail before succeeding again.
    remaining_failures: AtomicU32,
    /// Simulated read latency in milliseconds (0 = no delay).
    read_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStation")
            .field("station_type", &self.station_type)
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockStation {
    /// Create a console with an empty log and a 5 minute logging interval.
    pub fn new(station_type: StationType) -> Self {
        let mut memory = vec![0u8; MEMORY_END as usize];
        let fixed = fixed_format();
        let mut set = |name: &str, value: Value| {
            if let Some(field) = fixed.field(name) {
                // Defaults are all in range for their encodings.
                let _ = encode_field(&mut memory, field, &value);
            }
        };
        set("magic_0", Value::Int(0x55));
        set("magic_1", Value::Int(0xAA));
        set("read_period", Value::Int(5));
        set("settings_1", Value::Bits(0x20));
        set("data_count", Value::Int(1));
        set("current_pos", Value::Int(i64::from(DATA_START)));
        set("rel_pressure", Value::Float(1013.2));
        set("abs_pressure", Value::Float(1003.1));
        set("lux_wm2_coeff", Value::Float(12.6));

        let fresh = Sample {
            delay: Some(0),
            ..Default::default()
        };
        let empty = encode_sample(&fresh, station_type).unwrap_or_default();
        let start = usize::from(DATA_START);
        memory[start..start + empty.len()].copy_from_slice(&empty);

        Self {
            station_type,
            memory: RwLock::new(memory),
            read_count: AtomicU32::new(0),
            write_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            remaining_failures: AtomicU32::new(0),
            read_latency_ms: AtomicU64::new(0),
        }
    }

    /// Station class being simulated.
    pub fn station_type(&self) -> StationType {
        self.station_type
    }

    /// Encode a fixed-block field by name.
    pub async fn set_fixed(&self, name: &str, value: Value) -> Result<()> {
        let field = fixed_format()
            .field(name)
            .ok_or_else(|| Error::invalid_config(format!("no fixed block field '{}'", name)))?;
        let mut memory = self.memory.write().await;
        encode_field(&mut memory, field, &value)?;
        Ok(())
    }

    /// Set the logging interval in minutes.
    pub async fn set_read_period(&self, minutes: u8) {
        let _ = self
            .set_fixed("read_period", Value::Int(i64::from(minutes)))
            .await;
    }

    /// Address of the entry currently being filled.
    pub async fn current_pos(&self) -> u16 {
        let memory = self.memory.read().await;
        u16::from_le_bytes([memory[30], memory[31]])
    }

    /// Overwrite the entry at `ptr`.
    pub async fn write_sample(&self, ptr: u16, sample: &Sample) -> Result<()> {
        let encoded = encode_sample(sample, self.station_type)?;
        let start = usize::from(ptr);
        let mut memory = self.memory.write().await;
        memory[start..start + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }

    /// Update the entry being filled, as the console does on every sensor
    /// broadcast.
    pub async fn set_live(&self, sample: &Sample) -> Result<()> {
        let ptr = self.current_pos().await;
        self.write_sample(ptr, sample).await
    }

    /// Complete the current entry with `sample` and start a new one.
    ///
    /// Returns the address of the completed entry.
    pub async fn log_sample(&self, sample: &Sample) -> Result<u16> {
        let ptr = self.current_pos().await;
        self.write_sample(ptr, sample).await?;

        let next = inc_ptr(ptr, self.station_type);
        let fresh = Sample {
            delay: Some(0),
            ..*sample
        };
        self.write_sample(next, &fresh).await?;

        let mut memory = self.memory.write().await;
        let count = u16::from_le_bytes([memory[27], memory[28]]);
        let count = count.saturating_add(1).min(capacity(self.station_type));
        memory[27..29].copy_from_slice(&count.to_le_bytes());
        memory[30..32].copy_from_slice(&next.to_le_bytes());
        Ok(ptr)
    }

    /// Copy of the whole memory image.
    pub async fn snapshot(&self) -> Vec<u8> {
        self.memory.read().await.clone()
    }

    // ==================== Failure Injection ====================

    /// Make every transaction fail (or succeed again).
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` transactions, then succeed.
    pub fn fail_next(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Add a delay to every block read.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of block reads served (including failed ones).
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Number of byte writes served.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Relaxed)
    }

    fn check_failure(&self, operation: &'static str) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::device_io(operation, "mock failure"));
        }
        let injected = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(Error::device_io(operation, "injected mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StationTransport for MockStation {
    fn describe(&self) -> String {
        format!("mock {} station", self.station_type)
    }

    async fn read_block(&self, address: u16) -> Result<Bytes> {
        self.read_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_failure("read_block")?;

        let start = usize::from(address);
        if start % BLOCK_LEN != 0 {
            return Err(Error::device_io(
                "read_block",
                format!("unaligned address {:#06x}", address),
            ));
        }
        let memory = self.memory.read().await;
        Ok(Bytes::copy_from_slice(&memory[start..start + BLOCK_LEN]))
    }

    async fn write_byte(&self, address: u16, value: u8) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.check_failure("write_byte")?;

        let mut memory = self.memory.write().await;
        memory[usize::from(address)] = value;
        // The console acknowledges a settings change by clearing the flag.
        if address == 26 && value == 0xAA {
            memory[26] = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sample_advances_pointer() {
        let mock = MockStation::new(StationType::Wh1080);
        assert_eq!(mock.current_pos().await, DATA_START);

        let sample = Sample {
            delay: Some(5),
            temp_out: Some(11.5),
            ..Default::default()
        };
        let logged = mock.log_sample(&sample).await.unwrap();
        assert_eq!(logged, DATA_START);
        assert_eq!(mock.current_pos().await, DATA_START + 16);

        let memory = mock.snapshot().await;
        assert_eq!(u16::from_le_bytes([memory[27], memory[28]]), 2);
        // new entry starts with zero delay
        assert_eq!(memory[usize::from(DATA_START) + 16], 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mock = MockStation::new(StationType::Wh1080);
        mock.fail_next(2);
        assert!(mock.read_block(0).await.is_err());
        assert!(mock.read_block(0).await.is_err());
        assert!(mock.read_block(0).await.is_ok());
        assert_eq!(mock.read_count(), 3);

        mock.set_should_fail(true);
        assert!(mock.write_byte(16, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_unaligned_read_rejected() {
        let mock = MockStation::new(StationType::Wh1080);
        assert!(mock.read_block(0x0101).await.is_err());
    }
}
