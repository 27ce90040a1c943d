//! USB transport using libusb via `rusb`.
//!
//! Transfers are blocking (50 ms timeout for commands, 1.2 s for reads)
//! and each call runs on the blocking thread pool.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusb::{Direction, GlobalContext, Recipient, RequestType};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::BLOCK_LEN;
use crate::transport::{
    PRODUCT_ID, StationTransport, VENDOR_ID, WRITE_ACK, read_command, write_command,
};

const INTERFACE: u8 = 0;
const READ_ENDPOINT: u8 = 0x81;
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_millis(1200);

type Handle = rusb::DeviceHandle<GlobalContext>;

/// Weather station console attached over USB.
pub struct UsbTransport {
    handle: Arc<Mutex<Handle>>,
    description: String,
}

impl UsbTransport {
    /// Find the console by vendor/product id and claim its interface.
    pub fn open() -> Result<Self> {
        let mut handle = rusb::open_device_with_vid_pid(VENDOR_ID, PRODUCT_ID).ok_or_else(|| {
            Error::device_io(
                "open",
                format!("no device {:04x}:{:04x} found", VENDOR_ID, PRODUCT_ID),
            )
        })?;
        // Not supported on every platform; claiming below reports real failures.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle
            .claim_interface(INTERFACE)
            .map_err(|e| Error::device_io("open", e.to_string()))?;
        handle
            .set_alternate_setting(INTERFACE, 0)
            .map_err(|e| Error::device_io("open", e.to_string()))?;

        let device = handle.device();
        let description = format!(
            "usb bus {:03} device {:03}",
            device.bus_number(),
            device.address()
        );
        info!("Opened weather station at {}", description);

        Ok(Self {
            handle: Arc::new(Mutex::new(handle)),
            description,
        })
    }

    async fn transfer<R, F>(&self, operation: &'static str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Handle) -> rusb::Result<R> + Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let guard = handle
                .lock()
                .map_err(|_| Error::device_io(operation, "USB handle lock poisoned"))?;
            f(&guard).map_err(|e| Error::device_io(operation, e.to_string()))
        })
        .await
        .map_err(|e| Error::device_io(operation, e.to_string()))?
    }
}

fn send_command(handle: &Handle, command: &[u8; 8]) -> rusb::Result<usize> {
    handle.write_control(
        rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface),
        0x09,
        0x200,
        0,
        command,
        WRITE_TIMEOUT,
    )
}

#[async_trait]
impl StationTransport for UsbTransport {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn read_block(&self, address: u16) -> Result<Bytes> {
        let data = self
            .transfer("read_block", move |handle| {
                send_command(handle, &read_command(address))?;
                let mut buf = vec![0u8; BLOCK_LEN];
                let n = handle.read_bulk(READ_ENDPOINT, &mut buf, READ_TIMEOUT)?;
                buf.truncate(n);
                Ok(buf)
            })
            .await?;
        if data.len() != BLOCK_LEN {
            return Err(Error::device_io(
                "read_block",
                format!("short read at {:#06x}: {} bytes", address, data.len()),
            ));
        }
        Ok(Bytes::from(data))
    }

    async fn write_byte(&self, address: u16, value: u8) -> Result<()> {
        debug!("write_byte {:#06x} = {:#04x}", address, value);
        let ack = self
            .transfer("write_byte", move |handle| {
                send_command(handle, &write_command(address, value))?;
                let mut buf = [0u8; 8];
                let n = handle.read_bulk(READ_ENDPOINT, &mut buf, READ_TIMEOUT)?;
                Ok(buf[..n].to_vec())
            })
            .await?;
        if ack.len() != 8 || ack.iter().any(|&b| b != WRITE_ACK) {
            return Err(Error::device_io(
                "write_byte",
                format!("bad acknowledgement {:02x?}", ack),
            ));
        }
        Ok(())
    }
}
