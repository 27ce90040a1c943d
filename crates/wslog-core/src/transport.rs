//! Transport abstraction for station memory access.
//!
//! This module provides the [`StationTransport`] trait that abstracts over
//! the real USB connection and the in-memory [`crate::MockStation`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::memory::BLOCK_LEN;

/// USB vendor id of the console.
pub const VENDOR_ID: u16 = 0x1941;
/// USB product id of the console.
pub const PRODUCT_ID: u16 = 0x8021;
/// Byte the console repeats to acknowledge a write.
pub const WRITE_ACK: u8 = 0xA5;

/// Command packet requesting the 32-byte block at `address`.
pub fn read_command(address: u16) -> [u8; 8] {
    let [hi, lo] = address.to_be_bytes();
    [0xA1, hi, lo, BLOCK_LEN as u8, 0xA1, hi, lo, BLOCK_LEN as u8]
}

/// Command packet writing one byte at `address`.
pub fn write_command(address: u16, value: u8) -> [u8; 8] {
    let [hi, lo] = address.to_be_bytes();
    [0xA2, hi, lo, BLOCK_LEN as u8, 0xA2, value, 0, BLOCK_LEN as u8]
}

/// Raw access to station memory.
///
/// Implementations perform exactly one bus transaction per call and
/// never retry internally; retries and lockup-avoidance pacing are the
/// caller's job.
#[async_trait]
pub trait StationTransport: Send + Sync {
    /// Human-readable transport description for logs.
    fn describe(&self) -> String;

    /// Read the 32-byte block starting at a block-aligned `address`.
    async fn read_block(&self, address: u16) -> Result<Bytes>;

    /// Write a single byte and wait for the console's acknowledgement.
    async fn write_byte(&self, address: u16, value: u8) -> Result<()>;
}

#[async_trait]
impl<T: StationTransport + ?Sized> StationTransport for Arc<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn read_block(&self, address: u16) -> Result<Bytes> {
        (**self).read_block(address).await
    }

    async fn write_byte(&self, address: u16, value: u8) -> Result<()> {
        (**self).write_byte(address, value).await
    }
}

#[async_trait]
impl<T: StationTransport + ?Sized> StationTransport for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn read_block(&self, address: u16) -> Result<Bytes> {
        (**self).read_block(address).await
    }

    async fn write_byte(&self, address: u16, value: u8) -> Result<()> {
        (**self).write_byte(address, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_command_repeats_address() {
        assert_eq!(
            read_command(0x1234),
            [0xA1, 0x12, 0x34, 0x20, 0xA1, 0x12, 0x34, 0x20]
        );
    }

    #[test]
    fn test_write_command_layout() {
        assert_eq!(
            write_command(0x0010, 0x05),
            [0xA2, 0x00, 0x10, 0x20, 0xA2, 0x05, 0x00, 0x20]
        );
    }
}
