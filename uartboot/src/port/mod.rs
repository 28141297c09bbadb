//! Byte-channel abstraction used by the protocol layer.
//!
//! The protocol only needs a duplex byte stream that can report how many
//! received bytes are waiting. Opening and configuring the physical link is
//! left to the implementation.
//!
//! ```text
//! +------------------+
//! |  Flash sequencer |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |   Packet link    |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |    Port trait    |
//! +--------+---------+
//!          |
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::Read;
//! use uartboot::port::Port;
//!
//! fn drain<P: Port>(port: &mut P) -> uartboot::Result<Vec<u8>> {
//!     let mut buf = vec![0u8; port.bytes_to_read()? as usize];
//!     port.read_exact(&mut buf)?;
//!     Ok(buf)
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
///
/// The bootloader link is always 8N1 without flow control; only the port,
/// the baud rate and the blocking I/O timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout for a single blocking read or write.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 921_600,
            timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Duplex byte channel the bootloader protocol runs over.
pub trait Port: Read + Write + Send {
    /// Number of received bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Discard received bytes that have not been read yet.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

impl<P: Port + ?Sized> Port for &mut P {
    fn bytes_to_read(&mut self) -> Result<u32> {
        (**self).bytes_to_read()
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all_bytes(buf)
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
