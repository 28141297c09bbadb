//! Packet checksum.
//!
//! The checksum byte is built from three independent CRC-8 runs
//! (polynomial 0x07, MSB first, initial value 0, no final XOR) over the
//! command byte, the length byte and the meaningful payload bytes. The three
//! results are XORed together and truncated to one byte.

use crate::protocol::packet::MAX_DATA_LEN;

/// CRC-8 polynomial.
pub const CRC8_POLY: u32 = 0x07;

/// Compute the CRC-8 register over `data` without masking between shifts.
///
/// The register is only truncated when the checksum byte is produced, so the
/// returned value may exceed `0xFF` (a single `0x01` byte yields `263`).
/// Bits above bit 7 never feed back into the low byte, which keeps the
/// truncated result identical to a per-step masked CRC-8.
pub fn crc8(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Compute the checksum byte of a packet.
///
/// `data` is the whole fixed-capacity buffer; only `data[..len]` contributes.
#[allow(clippy::cast_possible_truncation)]
pub fn checksum(cmd: u8, len: u8, data: &[u8; MAX_DATA_LEN]) -> u8 {
    let combined = crc8(&[cmd]) ^ crc8(&[len]) ^ crc8(&data[..usize::from(len)]);
    (combined & 0xFF) as u8
}
