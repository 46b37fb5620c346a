use super::Transport;
use crate::constants::FRAME_SIZE;
use crate::error::{PmError, Result};
use crate::packet::{Frame, Request};
use bytes::Bytes;
use nusb::{Interface, transfer::RequestBuffer};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

// The PM1000 sits behind an FTDI FT60x USB 3.0 FIFO bridge
pub const VENDOR_ID: u16 = 0x0403;
pub const PRODUCT_IDS: [u16; 2] = [0x601E, 0x601F];
pub const PIPE_OUT: u8 = 0x02;
pub const PIPE_IN: u8 = 0x82;

/// FT60x data pipes live on the second interface
const DATA_INTERFACE: u8 = 1;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Bulk-pipe transport to a PM1000 through its FT60x bridge.
pub struct UsbTransport {
    interface: Interface,
    timeout: Duration,
}

impl UsbTransport {
    /// Open the first PM1000 found, or the one with the given serial number.
    pub async fn open(serial: Option<&str>) -> Result<Self> {
        info!("Searching for PM1000...");
        let device_info = nusb::list_devices()?
            .find(|d| {
                d.vendor_id() == VENDOR_ID
                    && PRODUCT_IDS.contains(&d.product_id())
                    && serial.is_none_or(|s| d.serial_number() == Some(s))
            })
            .ok_or(PmError::DeviceNotFound)?;

        info!(
            "Found device on bus {} addr {} (serial {})",
            device_info.bus_number(),
            device_info.device_address(),
            device_info.serial_number().unwrap_or("<none>")
        );

        let device = device_info.open()?;
        let interface = device.detach_and_claim_interface(DATA_INTERFACE)?;
        info!("Interface claimed successfully.");

        Ok(Self {
            interface,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn write_pipe(&self, data: Vec<u8>) -> Result<()> {
        debug!(bytes = hex::encode(&data), "Pipe write");
        let transfer = self.interface.bulk_out(PIPE_OUT, data);
        let completion = timeout(self.timeout, transfer).await?;
        completion.into_result()?;
        Ok(())
    }

    async fn read_pipe(&self, len: usize) -> Result<Bytes> {
        let transfer = self.interface.bulk_in(PIPE_IN, RequestBuffer::new(len));
        let completion = timeout(self.timeout, transfer).await?;
        let data = completion.into_result()?;
        debug!(bytes = hex::encode(&data), "Pipe read");
        Ok(Bytes::from(data))
    }
}

impl Transport for UsbTransport {
    async fn transact(&mut self, request: &Request) -> Result<Frame> {
        self.write_pipe(request.to_bytes().to_vec()).await?;
        let response = self.read_pipe(FRAME_SIZE).await?;
        Frame::parse_response(request.kind(), response)
    }
}
