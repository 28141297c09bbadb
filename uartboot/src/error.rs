//! Error types for uartboot.

use std::io;
use thiserror::Error;

use crate::protocol::packet::Command;

/// Result type for uartboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for uartboot operations.
///
/// Every variant is fatal to a flashing run. The only recovery the protocol
/// performs on its own is resending a frame when the device asks for it.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Not enough bytes arrived before the receive deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A received command byte does not map to any known command code.
    #[error("Unknown command code 0x{0:02X}")]
    UnknownCommand(u8),

    /// The device explicitly rejected a command.
    #[error("Device rejected {0} with NACK")]
    NegativeAcknowledge(Command),

    /// The device answered with a packet other than the one expected.
    #[error("Expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Command the host was waiting for.
        expected: Command,
        /// Command actually received.
        actual: Command,
    },

    /// An acknowledgement echoed a different command than the one sent.
    #[error("Expected ACK for {sent}, got ACK for {}", describe_code(*echoed))]
    CommandMismatch {
        /// Command the host sent.
        sent: Command,
        /// Command code echoed in the acknowledgement payload.
        echoed: u8,
    },

    /// The device did not signal readiness for the next write in time.
    #[error("Device not ready: {0}")]
    DeviceNotReady(String),

    /// The device kept asking for retransmission.
    #[error("{command} retransmitted {attempts} times without acknowledgement")]
    RetransmitLimit {
        /// Command being retransmitted.
        command: Command,
        /// Number of retransmissions performed.
        attempts: u32,
    },

    /// Payload does not fit in a single packet.
    #[error("Payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Requested payload length.
        len: usize,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// Firmware image cannot be used as given.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// A byte slice ends before the frame it starts is complete.
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    TruncatedFrame {
        /// Bytes the frame header announces, header and checksum included.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// The embedding application asked the transfer to stop.
    #[error("Operation interrupted")]
    Interrupted,
}

fn describe_code(code: u8) -> String {
    match Command::try_from(code) {
        Ok(cmd) => cmd.to_string(),
        Err(_) => format!("0x{code:02X}"),
    }
}
