//! Firmware update sequence.
//!
//! The flasher owns the port for the whole run and drives the bootloader
//! through its update states:
//!
//! ```text
//! host                                   device
//!  | -- DE AD BE EF ---------------------> |  sync
//!  | -- UPDATE_REQ ----------------------> |
//!  | <------------------------ ACK ------- |
//!  | <------------------- FW_LEN_REQ ----- |
//!  | -- FW_LEN_RESP (u32 BE) ------------> |
//!  | <------------------------ ACK ------- |
//!  | <--------------- WRITE_DATA_RDY ----- |  \
//!  | -- WRITE_MEM (addr BE + data) ------> |   | per chunk
//!  | <------------------------ ACK ------- |  /
//!  | <--------------- FW_UPDATE_DONE ----- |
//! ```
//!
//! Every step is fatal on failure. The port is closed when the flasher is
//! closed or dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartboot::{FlashConfig, Flasher, Firmware};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = Firmware::from_file("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut flasher = Flasher::open("/dev/ttyUSB0", 921_600, FlashConfig::default())?;
//!         flasher.flash(image.data(), |done, total| {
//!             println!("{done}/{total}");
//!         })?;
//!         flasher.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::image::{Firmware, chunks};
use crate::port::Port;
use crate::protocol::{Command, LinkConfig, Packet, PacketLink};

/// First application address behind the bootloader.
pub const DEFAULT_START_ADDRESS: u32 = 0x8000;

/// Flash sequence options.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// Address of the first image byte.
    pub start_address: u32,
    /// Packet exchange options.
    pub link: LinkConfig,
    /// How long to wait for each `WRITE_DATA_RDY`.
    pub ready_timeout: Duration,
    /// How long to wait for `FW_UPDATE_DONE` after the last chunk.
    pub done_timeout: Duration,
    /// Query the bootloader version between sync and update request.
    pub query_version: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            start_address: DEFAULT_START_ADDRESS,
            link: LinkConfig::default(),
            ready_timeout: Duration::from_secs(1),
            done_timeout: Duration::from_secs(1),
            query_version: false,
        }
    }
}

impl FlashConfig {
    /// Set the start address.
    #[must_use]
    pub fn with_start_address(mut self, address: u32) -> Self {
        self.start_address = address;
        self
    }

    /// Set the response timeout for all waits of the sequence.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.link.response_timeout = timeout;
        self.ready_timeout = timeout;
        self.done_timeout = timeout;
        self
    }

    /// Set the retransmission bound per exchange.
    #[must_use]
    pub fn with_max_retransmits(mut self, max: u32) -> Self {
        self.link.max_retransmits = max;
        self
    }

    /// Enable or disable the version query.
    #[must_use]
    pub fn with_query_version(mut self, query: bool) -> Self {
        self.query_version = query;
        self
    }
}

/// Callback polled between chunks; returning `true` stops the transfer.
pub type InterruptChecker = Box<dyn Fn() -> bool + Send + Sync>;

/// Bootloader flasher.
///
/// Generic over the port type so the sequence runs the same against a
/// serial device and an in-memory peer.
pub struct Flasher<P: Port> {
    port: P,
    config: FlashConfig,
    interrupt: Option<InterruptChecker>,
    closed: bool,
}

impl<P: Port> Flasher<P> {
    /// Create a flasher over an already opened port.
    pub fn new(port: P, config: FlashConfig) -> Self {
        Self {
            port,
            config,
            interrupt: None,
            closed: false,
        }
    }

    /// Use `checker` instead of the process-wide interrupt checker.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupt = Some(Box::new(checker));
        self
    }

    fn interrupted(&self) -> bool {
        match self.interrupt {
            Some(ref checker) => checker(),
            None => crate::is_interrupted_requested(),
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Options in use.
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    fn link(&mut self) -> PacketLink<'_, P> {
        PacketLink::with_config(&mut self.port, self.config.link.clone())
    }

    /// Put the bootloader into packet mode.
    ///
    /// Bytes received before the sync are discarded first.
    pub fn sync(&mut self) -> Result<()> {
        self.port.clear_input()?;
        self.link().send_sync()?;
        info!("Sync sent on {}", self.port.name());
        Ok(())
    }

    /// Query the bootloader version byte.
    pub fn request_version(&mut self) -> Result<u8> {
        let response = self.link().request(&Packet::command(Command::GetVersion))?;
        let version = response.payload().first().copied().unwrap_or(0);
        info!("Bootloader version: 0x{version:02X}");
        Ok(version)
    }

    /// Ask the device to start an update and wait for its length request.
    pub fn request_update(&mut self) -> Result<()> {
        let response = self.link().request(&Packet::command(Command::UpdateReq))?;
        expect_command(Command::FwLenReq, &response)?;
        info!("Update request accepted");
        Ok(())
    }

    /// Announce the image length.
    pub fn send_firmware_length(&mut self, len: u32) -> Result<()> {
        self.link()
            .send_and_confirm(&Packet::firmware_length(len))?;
        info!("Firmware length sent: {len} bytes");
        Ok(())
    }

    /// Wait for the device to accept the next chunk.
    pub fn wait_data_ready(&mut self) -> Result<()> {
        let timeout = self.config.ready_timeout;
        let response = match self.link().receive_packet_within(timeout) {
            Ok(packet) => packet,
            Err(Error::Timeout(detail)) => return Err(Error::DeviceNotReady(detail)),
            Err(e) => return Err(e),
        };
        expect_command(Command::WriteDataRdy, &response)
    }

    /// Write one chunk at `address` once the device is ready for it.
    pub fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.wait_data_ready()?;
        let packet = Packet::write_memory(address, data)?;
        debug!("Writing {} bytes at 0x{address:08X}", data.len());
        self.link().send_and_confirm(&packet)
    }

    /// Wait for the device to report the end of the update.
    pub fn wait_update_done(&mut self) -> Result<()> {
        let timeout = self.config.done_timeout;
        let response = self.link().receive_packet_within(timeout)?;
        expect_command(Command::FwUpdateDone, &response)?;
        info!("Firmware update done");
        Ok(())
    }

    /// Run the whole update sequence for `image`.
    ///
    /// `progress` receives `(bytes_done, total)` after each confirmed chunk.
    pub fn flash<F>(&mut self, image: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if image.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }
        let total = image.len();
        let len = u32::try_from(total).map_err(|_| {
            Error::InvalidImage(format!("image of {total} bytes exceeds the 32-bit length field"))
        })?;
        let chunks = chunks(image, self.config.start_address)?;

        self.sync()?;
        if self.config.query_version {
            self.request_version()?;
        }
        self.request_update()?;
        self.send_firmware_length(len)?;

        let mut done = 0;
        for chunk in chunks {
            if self.interrupted() {
                return Err(Error::Interrupted);
            }
            self.write_chunk(chunk.address, chunk.data)?;
            done += chunk.data.len();
            progress(done, total);
        }

        self.wait_update_done()
    }

    /// Run the update sequence for a loaded image.
    pub fn flash_firmware<F>(&mut self, firmware: &Firmware, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.flash(firmware.data(), progress)
    }

    /// Release the port. Further calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing {}", self.port.name());
        self.port.close()
    }
}

impl<P: Port> fmt::Debug for Flasher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flasher")
            .field("port", &self.port.name())
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<P: Port> Drop for Flasher<P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn expect_command(expected: Command, response: &Packet) -> Result<()> {
    let actual = response.command_type();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::UnexpectedResponse { expected, actual })
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{FlashConfig, Flasher, Result};
    use crate::port::{NativePort, SerialConfig};

    impl Flasher<NativePort> {
        /// Open `port_name` at `baud_rate` and create a flasher over it.
        pub fn open(port_name: &str, baud_rate: u32, config: FlashConfig) -> Result<Self> {
            let port = NativePort::open(&SerialConfig::new(port_name, baud_rate))?;
            Ok(Self::new(port, config))
        }
    }
}
