//! Serial transport for the MK2/MK3 adapter
//!
//! Opens the adapter's USB-serial device at 8N1 and provides the rate
//! switches the adapter needs: VE.Bus talks at 2400 baud by default, MK3
//! adapters can be switched online to 115200 with an undocumented magic
//! sequence.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::codec::{encode_command, hex};
use crate::protocol::constants::CMD_RESET;

/// Default VE.Bus rate
pub const BAUD_LOW: u32 = 2400;
/// Rate after the MK3 high-speed upgrade
pub const BAUD_HIGH: u32 = 115_200;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial connection to the MK2/MK3 adapter.
pub struct MkPort {
    stream: SerialStream,
    path: String,
}

impl MkPort {
    /// Open `path` at 2400 baud, 8 data bits, no parity, 1 stop bit, no
    /// flow control.
    pub fn open(path: &str) -> Result<Self> {
        let mut stream = tokio_serial::new(path, BAUD_LOW)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open_native_async()?;

        #[cfg(unix)]
        stream.set_exclusive(false)?;

        info!("opened serial port {path} at {BAUD_LOW} baud");
        Ok(Self {
            stream,
            path: path.to_string(),
        })
    }

    /// Change the line rate in place.
    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        self.stream.set_baud_rate(baud)?;
        debug!("serial port {} now at {baud} baud", self.path);
        Ok(())
    }

    /// Write raw bytes. A short or failed write is an error; the adapter
    /// cannot recover from a partially transmitted frame.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        debug!(data = %hex(data), len = data.len(), "sent bytes");
        Ok(())
    }

    /// Reset the adapter at both rates so it comes up in a defined state
    /// regardless of what the previous session left behind.
    pub async fn reset_adapter(&mut self) -> Result<()> {
        self.set_baud(BAUD_HIGH)?;
        self.write_all(&encode_command(CMD_RESET, &[])).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.set_baud(BAUD_LOW)?;
        Ok(())
    }

    /// Switch an MK3 adapter to 115200 baud.
    ///
    /// The sequence is undocumented and may break on other adapter
    /// revisions; callers offer a switch to skip it and stay at 2400.
    pub async fn upgrade_high_speed(&mut self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.write_all(&[0x02, 0xFF, 0x4E, 0xB1]).await?;

        tokio::time::sleep(Duration::from_millis(50)).await;

        self.set_baud(BAUD_HIGH)?;
        self.write_all(b"UUUUU").await?;

        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("adapter switched to {BAUD_HIGH} baud");
        Ok(())
    }

    /// Hand the underlying stream to the frame reader.
    pub fn into_stream(self) -> SerialStream {
        self.stream
    }
}
