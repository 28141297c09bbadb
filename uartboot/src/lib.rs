//! # uartboot
//!
//! Host side of a small UART firmware bootloader protocol.
//!
//! The crate provides:
//!
//! - The packet format (`[cmd][len][data][checksum]`) and its CRC-8 based
//!   checksum
//! - A confirmed packet exchange with device-requested retransmission
//! - The firmware update sequence (sync, update request, length, chunked
//!   memory writes, completion)
//! - Serial port access and USB-UART bridge discovery
//! - Image helpers for padding and C array export
//!
//! ## Features
//!
//! - `native` (default): Serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartboot::{FlashConfig, Firmware};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = Firmware::from_file("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let config = FlashConfig::default().with_start_address(0x8000);
//!         let mut flasher = uartboot::Flasher::open("/dev/ttyUSB0", 921_600, config)?;
//!         flasher.flash_firmware(&image, |done, total| {
//!             println!("{done}/{total} bytes");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;

#[cfg(test)]
mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use {
    device::detect_ports,
    port::{NativePort, NativePortEnumerator},
};
pub use {
    device::{BridgeKind, DetectedPort},
    error::{Error, Result},
    flasher::{DEFAULT_START_ADDRESS, FlashConfig, Flasher},
    image::{Chunk, DEFAULT_FILL, Firmware, pad_image, to_c_array},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, LinkConfig, Packet, PacketLink},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
