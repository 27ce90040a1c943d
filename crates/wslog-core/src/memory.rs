//! Station memory map and circular-buffer pointer arithmetic.

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use wslog_types::StationType;

/// Size of one USB read transfer.
pub const BLOCK_LEN: usize = 0x20;
/// Size of the fixed block at the start of memory.
pub const FIXED_BLOCK_LEN: usize = 0x100;
/// First address of the circular log buffer.
pub const DATA_START: u16 = 0x0100;
/// One past the last address of station memory.
pub const MEMORY_END: u32 = 0x1_0000;

/// Round an address down to its block boundary.
pub fn block_address(address: u16) -> u16 {
    address - address % BLOCK_LEN as u16
}

/// Number of log entries the circular buffer holds.
pub fn capacity(station: StationType) -> u16 {
    ((MEMORY_END - u32::from(DATA_START)) / station.reading_len() as u32) as u16
}

/// Address of the entry after `ptr`, wrapping to the start of the buffer.
pub fn inc_ptr(ptr: u16, station: StationType) -> u16 {
    let next = u32::from(ptr) + station.reading_len() as u32;
    if next >= MEMORY_END {
        DATA_START
    } else {
        next as u16
    }
}

/// Address of the entry before `ptr`, wrapping to the end of the buffer.
pub fn dec_ptr(ptr: u16, station: StationType) -> u16 {
    let len = station.reading_len() as u32;
    match u32::from(ptr).checked_sub(len) {
        Some(prev) if prev >= u32::from(DATA_START) => prev as u16,
        _ => (MEMORY_END - len) as u16,
    }
}

/// Index of the entry at `ptr` within the buffer.
pub fn entry_index(ptr: u16, station: StationType) -> u16 {
    ((ptr.saturating_sub(DATA_START)) as usize / station.reading_len()) as u16
}

/// Number of entries written between two buffer positions.
///
/// Positions are entry indices in a buffer of `capacity` entries; the
/// result is `(new - old) mod capacity` and is never negative.
pub fn entries_between(old: u16, new: u16, capacity: u16) -> u16 {
    let capacity = u32::from(capacity);
    ((capacity + u32::from(new) - u32::from(old) % capacity) % capacity) as u16
}

/// Number of entries the station logged when its pointer moved from
/// `old_ptr` to `new_ptr`.
pub fn pointer_distance(old_ptr: u16, new_ptr: u16, station: StationType) -> u16 {
    entries_between(
        entry_index(old_ptr, station),
        entry_index(new_ptr, station),
        capacity(station),
    )
}

/// The station pointer together with the host time of the last entry
/// synchronised from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Address of the last synchronised (complete) entry.
    pub ptr: u16,
    /// Timestamp assigned to that entry.
    #[serde(with = "wslog_types::timestamp")]
    pub timestamp: PrimitiveDateTime,
}
