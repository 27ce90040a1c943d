//! Weather station decoder.
//!
//! [`Station`] wraps a [`StationTransport`] and turns raw 32-byte memory
//! blocks into the fixed block and log entries. Reads are repeated until
//! two consecutive transfers agree, since the console may be rewriting a
//! block while it is being read.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use wslog_types::{Sample, StationType};

use crate::error::{Error, Result};
use crate::fixed::FixedBlock;
use crate::format::{Decoded, Value, decode_fields, decode_sample, fixed_format};
use crate::memory::{BLOCK_LEN, DATA_START, FIXED_BLOCK_LEN, block_address, inc_ptr};
use crate::transport::StationTransport;

/// Maximum transfers spent trying to get two matching reads of a block.
const MAX_STABLE_READS: u32 = 4;

/// Number of recently read blocks kept for buffered reads.
const BLOCK_CACHE_CAPACITY: usize = 8;

/// Offset of the "data changed" flag in the fixed block.
const DATA_CHANGED: u16 = 26;

/// Polls of the "data changed" flag before giving up on a write.
const WRITE_ACK_POLLS: u32 = 5;

/// Pause between polls of the "data changed" flag.
const WRITE_ACK_INTERVAL: Duration = Duration::from_secs(6);

/// Small least-recently-used cache of memory blocks keyed by address.
#[derive(Debug, Default)]
struct BlockCache {
    blocks: HashMap<u16, Bytes>,
    order: VecDeque<u16>,
}

impl BlockCache {
    fn get(&mut self, address: u16) -> Option<Bytes> {
        let block = self.blocks.get(&address)?.clone();
        self.touch(address);
        Some(block)
    }

    fn insert(&mut self, address: u16, block: Bytes) {
        if self.blocks.insert(address, block).is_none() && self.blocks.len() > BLOCK_CACHE_CAPACITY
        {
            if let Some(oldest) = self.order.pop_front() {
                self.blocks.remove(&oldest);
            }
        }
        self.touch(address);
    }

    fn touch(&mut self, address: u16) {
        self.order.retain(|a| *a != address);
        self.order.push_back(address);
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.order.clear();
    }
}

/// Decoder for a single weather station console.
///
/// The station owns its transport. Every method that touches the device
/// takes `&mut self`, so at most one USB transaction is in flight.
pub struct Station<T> {
    transport: T,
    station_type: StationType,
    cache: BlockCache,
    fixed: Option<FixedBlock>,
    current_ptr: Option<u16>,
}

impl<T> std::fmt::Debug for Station<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("station_type", &self.station_type)
            .field("current_ptr", &self.current_ptr)
            .field("fixed_cached", &self.fixed.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: StationTransport> Station<T> {
    /// Create a decoder for a console of the given class.
    pub fn new(transport: T, station_type: StationType) -> Self {
        Self {
            transport,
            station_type,
            cache: BlockCache::default(),
            fixed: None,
            current_ptr: None,
        }
    }

    /// Seed the fixed block from persisted status so startup can skip a
    /// full read of it.
    pub fn with_fixed_block(mut self, fixed: FixedBlock) -> Self {
        self.fixed = Some(fixed);
        self
    }

    /// Station class this decoder was created for.
    pub fn station_type(&self) -> StationType {
        self.station_type
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The fixed block as last read, without touching the device.
    pub fn cached_fixed_block(&self) -> Option<&FixedBlock> {
        self.fixed.as_ref()
    }

    /// Forget every cached block and the cached fixed block.
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
        self.fixed = None;
    }

    /// Read the 32-byte block containing `address`.
    ///
    /// With `unbuffered` set the block cache is bypassed. Transport errors
    /// are returned as-is so the caller can pace its retries.
    pub async fn read_block(&mut self, address: u16, unbuffered: bool) -> Result<Bytes> {
        let address = block_address(address);
        if !unbuffered && let Some(block) = self.cache.get(address) {
            return Ok(block);
        }

        let mut previous: Option<Bytes> = None;
        for _ in 0..MAX_STABLE_READS {
            let block = self.transport.read_block(address).await?;
            if block.len() != BLOCK_LEN {
                return Err(Error::decode(format!(
                    "block {:#06x}: expected {} bytes, got {}",
                    address,
                    BLOCK_LEN,
                    block.len()
                )));
            }
            if previous.as_ref() == Some(&block) {
                trace!("block {:#06x} stable", address);
                self.cache.insert(address, block.clone());
                return Ok(block);
            }
            if previous.is_some() {
                debug!("block {:#06x} changed between reads", address);
            }
            previous = Some(block);
        }

        Err(Error::decode(format!(
            "block {:#06x} did not settle after {} reads",
            address, MAX_STABLE_READS
        )))
    }

    /// Read the blocks covering `span` into a buffer addressed from zero.
    async fn read_span(&mut self, span: Range<usize>, unbuffered: bool) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; span.end.next_multiple_of(BLOCK_LEN)];
        let first = span.start - span.start % BLOCK_LEN;
        for start in (first..span.end).step_by(BLOCK_LEN) {
            let address = u16::try_from(start)
                .map_err(|_| Error::decode(format!("address {:#x} out of range", start)))?;
            let block = self.read_block(address, unbuffered).await?;
            buf[start..start + BLOCK_LEN].copy_from_slice(&block);
        }
        Ok(buf)
    }

    /// Read and cache the whole fixed block.
    ///
    /// The cached copy is returned unless `unbuffered` is set or nothing
    /// has been read yet.
    pub async fn fixed_block(&mut self, unbuffered: bool) -> Result<&FixedBlock> {
        if unbuffered || self.fixed.is_none() {
            let raw = self.read_span(0..FIXED_BLOCK_LEN, true).await?;
            self.fixed = Some(FixedBlock::from_raw(raw)?);
        }
        self.fixed
            .as_ref()
            .ok_or_else(|| Error::decode("fixed block unavailable"))
    }

    /// Decode the fixed-block fields named by `prefix`.
    ///
    /// Only the blocks that hold those fields are fetched, so polling a
    /// couple of fields costs one or two transfers rather than eight.
    pub async fn decode_fixed_block(&mut self, prefix: &str, unbuffered: bool) -> Result<Decoded> {
        if !unbuffered && let Some(fixed) = &self.fixed {
            return fixed.decode(prefix);
        }
        let table = fixed_format();
        let span = table
            .span(prefix)
            .ok_or_else(|| Error::invalid_config(format!("unknown fixed block field '{}'", prefix)))?;
        let buf = self.read_span(span, unbuffered).await?;
        Ok(decode_fields(&buf, table.select(prefix))?)
    }

    /// Read the address of the log entry the console is currently filling.
    pub async fn current_pos(&mut self) -> Result<u16> {
        let decoded = self.decode_fixed_block("current_pos", true).await?;
        let ptr = decoded
            .get("current_pos")
            .and_then(Value::as_i64)
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| Error::decode("current_pos missing from fixed block"))?;

        let len = self.station_type.reading_len() as u16;
        if ptr < DATA_START || (ptr - DATA_START) % len != 0 {
            return Err(Error::decode(format!("invalid data pointer {:#06x}", ptr)));
        }

        if let Some(old) = self.current_ptr
            && ptr != old
            && ptr != inc_ptr(old, self.station_type)
        {
            error!("unexpected ptr change {:06x} -> {:06x}", old, ptr);
        }
        self.current_ptr = Some(ptr);
        Ok(ptr)
    }

    /// Raw bytes of the log entry at `ptr`, which may straddle two blocks.
    pub async fn read_raw_entry(&mut self, ptr: u16, unbuffered: bool) -> Result<Vec<u8>> {
        let len = self.station_type.reading_len();
        let start = block_address(ptr);
        let offset = usize::from(ptr - start);

        let mut raw = self.read_block(start, unbuffered).await?.to_vec();
        if offset + len > BLOCK_LEN {
            let next = start
                .checked_add(BLOCK_LEN as u16)
                .ok_or_else(|| Error::decode(format!("entry {:#06x} runs past memory", ptr)))?;
            raw.extend_from_slice(&self.read_block(next, unbuffered).await?);
        }
        Ok(raw[offset..offset + len].to_vec())
    }

    /// Read and decode the log entry at `ptr`.
    pub async fn read_sample(&mut self, ptr: u16, unbuffered: bool) -> Result<Sample> {
        let raw = self.read_raw_entry(ptr, unbuffered).await?;
        self.decode_reading_block(&raw)
    }

    /// Decode one log entry for this station class.
    pub fn decode_reading_block(&self, buf: &[u8]) -> Result<Sample> {
        Ok(decode_sample(buf, self.station_type)?)
    }

    /// Write bytes into the fixed block and wait for the console to
    /// acknowledge the change.
    pub async fn write_data(&mut self, data: &[(u16, u8)]) -> Result<()> {
        for &(address, value) in data {
            if usize::from(address) >= FIXED_BLOCK_LEN {
                return Err(Error::invalid_config(format!(
                    "refusing to write outside the fixed block at {:#06x}",
                    address
                )));
            }
            self.transport.write_byte(address, value).await?;
        }
        self.transport.write_byte(DATA_CHANGED, 0xAA).await?;
        self.invalidate_cache();

        for attempt in 1..=WRITE_ACK_POLLS {
            let decoded = self.decode_fixed_block("data_changed", true).await?;
            if decoded.get("data_changed").and_then(Value::as_i64) == Some(0) {
                debug!("write_data acknowledged after {} poll(s)", attempt);
                return Ok(());
            }
            if attempt < WRITE_ACK_POLLS {
                tokio::time::sleep(WRITE_ACK_INTERVAL).await;
            }
        }

        warn!("station did not acknowledge write_data");
        Err(Error::device_io(
            "write_data",
            "station did not clear the data changed flag",
        ))
    }
}
