//! Bootloader packet format and command codes.
//!
//! ## Frame Format
//!
//! ```text
//! +-----+-----+----------------+----------+
//! | CMD | LEN |      DATA      | CHECKSUM |
//! +-----+-----+----------------+----------+
//! |  1  |  1  |   LEN bytes    |    1     |
//! +-----+-----+----------------+----------+
//! ```
//!
//! A command issued without a payload still travels with `LEN = 1` and a
//! single `0x00` data byte. Packets originated by the device may carry
//! `LEN = 0`.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::protocol::crc::checksum;

/// Capacity of the packet data buffer.
pub const MAX_DATA_LEN: usize = 255;

/// Length of the big-endian address prefix of a memory write.
pub const FW_ADDR_LEN: usize = 4;

/// Maximum number of firmware bytes carried by one memory write.
pub const MAX_CHUNK_LEN: usize = MAX_DATA_LEN - FW_ADDR_LEN;

/// Out-of-band marker that puts the bootloader into its packet mode.
pub const SYNC_BYTES: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Protocol command codes.
///
/// The set is closed: decoding any other byte fails with
/// [`Error::UnknownCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    /// Query device identity.
    GetId = 0x01,
    /// Query bootloader version.
    GetVersion = 0x02,
    /// Request a firmware update.
    UpdateReq = 0x03,
    /// Device asks for the firmware length.
    FwLenReq = 0x04,
    /// Host supplies the firmware length (4-byte big-endian).
    FwLenResp = 0x05,
    /// Reset the device.
    Reset = 0x14,
    /// Read memory.
    ReadMem = 0x15,
    /// Write memory (4-byte big-endian address followed by data).
    WriteMem = 0x16,
    /// Device is ready for the next write.
    WriteDataRdy = 0x17,
    /// Device finished receiving the firmware.
    FwUpdateDone = 0x18,
    /// Device asks for the last frame again.
    Retx = 0x90,
    /// Acknowledge; data byte 0 echoes the acknowledged command.
    Ack = 0x91,
    /// Negative acknowledge.
    Nack = 0x92,
}

impl Command {
    /// Wire name of the command.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetId => "GET_ID",
            Self::GetVersion => "GET_VERSION",
            Self::UpdateReq => "UPDATE_REQ",
            Self::FwLenReq => "FW_LEN_REQ",
            Self::FwLenResp => "FW_LEN_RESP",
            Self::Reset => "RESET",
            Self::ReadMem => "READ_MEM",
            Self::WriteMem => "WRITE_MEM",
            Self::WriteDataRdy => "WRITE_DATA_RDY",
            Self::FwUpdateDone => "FW_UPDATE_DONE",
            Self::Retx => "RETX",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Self::GetId,
            0x02 => Self::GetVersion,
            0x03 => Self::UpdateReq,
            0x04 => Self::FwLenReq,
            0x05 => Self::FwLenResp,
            0x14 => Self::Reset,
            0x15 => Self::ReadMem,
            0x16 => Self::WriteMem,
            0x17 => Self::WriteDataRdy,
            0x18 => Self::FwUpdateDone,
            0x90 => Self::Retx,
            0x91 => Self::Ack,
            0x92 => Self::Nack,
            other => return Err(Error::UnknownCommand(other)),
        })
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One protocol packet.
///
/// The data buffer has a fixed capacity of [`MAX_DATA_LEN`] bytes; only the
/// first `len` are meaningful and nothing past them is ever read or sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    cmd: Command,
    len: u8,
    data: [u8; MAX_DATA_LEN],
    checksum: u8,
}

impl Packet {
    /// Create a command packet without an explicit payload.
    ///
    /// Frames as `len = 1` with a single zero data byte.
    pub fn command(cmd: Command) -> Self {
        Self::from_parts(cmd, 1, [0u8; MAX_DATA_LEN])
    }

    /// Create a packet carrying `payload`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_payload(cmd: Command, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_DATA_LEN {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_DATA_LEN,
            });
        }
        let mut data = [0u8; MAX_DATA_LEN];
        data[..payload.len()].copy_from_slice(payload);
        // Safe cast: bounded by MAX_DATA_LEN above
        Ok(Self::from_parts(cmd, payload.len() as u8, data))
    }

    /// Build the `FW_LEN_RESP` packet announcing the image size.
    pub fn firmware_length(len: u32) -> Self {
        let mut data = [0u8; MAX_DATA_LEN];
        BigEndian::write_u32(&mut data[..FW_ADDR_LEN], len);
        Self::from_parts(Command::FwLenResp, 4, data)
    }

    /// Build a `WRITE_MEM` packet for `chunk` at `addr`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_memory(addr: u32, chunk: &[u8]) -> Result<Self> {
        if chunk.len() > MAX_CHUNK_LEN {
            return Err(Error::PayloadTooLarge {
                len: chunk.len(),
                max: MAX_CHUNK_LEN,
            });
        }
        let mut data = [0u8; MAX_DATA_LEN];
        BigEndian::write_u32(&mut data[..FW_ADDR_LEN], addr);
        data[FW_ADDR_LEN..FW_ADDR_LEN + chunk.len()].copy_from_slice(chunk);
        // Safe cast: at most 4 + 251
        Ok(Self::from_parts(
            Command::WriteMem,
            (FW_ADDR_LEN + chunk.len()) as u8,
            data,
        ))
    }

    fn from_parts(cmd: Command, len: u8, data: [u8; MAX_DATA_LEN]) -> Self {
        Self {
            cmd,
            len,
            checksum: checksum(cmd.into(), len, &data),
            data,
        }
    }

    /// Command code.
    pub fn command_type(&self) -> Command {
        self.cmd
    }

    /// Number of meaningful data bytes.
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Whether the packet carries no data bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Meaningful data bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Checksum byte, as computed on build or as received from the wire.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Checksum recomputed from the packet contents.
    pub fn expected_checksum(&self) -> u8 {
        checksum(self.cmd.into(), self.len, &self.data)
    }

    /// Serialize the packet into its wire frame.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + usize::from(self.len));
        buf.push(self.cmd.into());
        buf.push(self.len);
        buf.extend_from_slice(self.payload());
        buf.push(self.checksum);
        buf
    }

    /// Parse one complete frame from `frame`.
    ///
    /// The checksum byte is stored as received and not verified. Trailing
    /// bytes after the frame are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let truncated = |needed| Error::TruncatedFrame {
            needed,
            available: frame.len(),
        };
        let (&cmd, &len) = match frame {
            [cmd, len, ..] => (cmd, len),
            _ => return Err(truncated(2)),
        };
        let cmd = Command::try_from(cmd)?;
        let len_usize = usize::from(len);
        let needed = len_usize + 3;
        if frame.len() < needed {
            return Err(truncated(needed));
        }
        let payload = &frame[2..2 + len_usize];
        Ok(Self::from_wire(cmd, len, payload, frame[2 + len_usize]))
    }

    /// Assemble a received packet from its raw fields.
    pub(crate) fn from_wire(cmd: Command, len: u8, payload: &[u8], checksum: u8) -> Self {
        let mut data = [0u8; MAX_DATA_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            cmd,
            len,
            data,
            checksum,
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("cmd", &self.cmd)
            .field("len", &self.len)
            .field("data", &self.payload())
            .field("checksum", &format_args!("0x{:02X}", self.checksum))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip_all_codes() {
        for code in 0..=u8::MAX {
            if let Ok(cmd) = Command::try_from(code) {
                assert_eq!(u8::from(cmd), code);
            }
        }
        assert_eq!(Command::try_from(0x91).unwrap(), Command::Ack);
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        assert!(matches!(
            Command::try_from(0x00),
            Err(Error::UnknownCommand(0x00))
        ));
        assert!(matches!(
            Command::try_from(0x93),
            Err(Error::UnknownCommand(0x93))
        ));
    }

    #[test]
    fn test_get_id_without_payload_frame() {
        let frame = Packet::command(Command::GetId).build();
        assert_eq!(frame, vec![0x01, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_firmware_length_frame() {
        let packet = Packet::firmware_length(12345);
        assert_eq!(packet.len(), 4);
        assert_eq!(packet.payload(), &[0x00, 0x00, 0x30, 0x39]);
        assert_eq!(packet.build(), vec![0x05, 0x04, 0x00, 0x00, 0x30, 0x39, 0x51]);
    }

    #[test]
    fn test_write_memory_layout() {
        let packet = Packet::write_memory(0x8000, &[0xAA, 0xBB]).unwrap();
        assert_eq!(packet.command_type(), Command::WriteMem);
        assert_eq!(packet.len(), 6);
        assert_eq!(packet.payload(), &[0x00, 0x00, 0x80, 0x00, 0xAA, 0xBB]);
        assert_eq!(packet.build().len(), 2 + 6 + 1);
    }

    #[test]
    fn test_write_memory_rejects_oversized_chunk() {
        let chunk = [0u8; MAX_CHUNK_LEN + 1];
        assert!(matches!(
            Packet::write_memory(0, &chunk),
            Err(Error::PayloadTooLarge { len: 252, max: 251 })
        ));
        assert_eq!(
            Packet::write_memory(0, &chunk[..MAX_CHUNK_LEN]).unwrap().len(),
            255
        );
    }

    #[test]
    fn test_with_payload_rejects_oversized() {
        let payload = vec![0u8; MAX_DATA_LEN + 1];
        assert!(Packet::with_payload(Command::WriteMem, &payload).is_err());
    }

    #[test]
    fn test_decode_recovers_every_length() {
        let source: Vec<u8> = (0..=254u8).map(|b| b.wrapping_mul(31)).collect();
        for len in 0..=MAX_DATA_LEN {
            let packet = Packet::with_payload(Command::WriteMem, &source[..len]).unwrap();
            let decoded = Packet::decode(&packet.build()).unwrap();
            assert_eq!(decoded.command_type(), Command::WriteMem);
            assert_eq!(usize::from(decoded.len()), len);
            assert_eq!(decoded.payload(), &source[..len]);
        }
    }

    #[test]
    fn test_decode_keeps_bad_checksum() {
        let mut frame = Packet::command(Command::Ack).build();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let packet = Packet::decode(&frame).unwrap();
        assert_ne!(packet.checksum(), packet.expected_checksum());
        assert_eq!(packet.checksum(), frame[last]);
    }

    #[test]
    fn test_decode_zero_length_frame() {
        let packet = Packet::with_payload(Command::FwLenReq, &[]).unwrap();
        let frame = packet.build();
        assert_eq!(frame.len(), 3);
        let decoded = Packet::decode(&frame).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.command_type(), Command::FwLenReq);
    }

    #[test]
    fn test_decode_truncated_frame() {
        assert!(matches!(
            Packet::decode(&[0x91]),
            Err(Error::TruncatedFrame {
                needed: 2,
                available: 1
            })
        ));
        // ACK announcing 4 data bytes with only 2 present and no checksum
        assert!(matches!(
            Packet::decode(&[0x91, 0x04, 0x16, 0x00]),
            Err(Error::TruncatedFrame {
                needed: 7,
                available: 4
            })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        assert!(matches!(
            Packet::decode(&[0x42, 0x00, 0x00]),
            Err(Error::UnknownCommand(0x42))
        ));
    }

    #[test]
    fn test_debug_shows_only_meaningful_bytes() {
        let packet = Packet::with_payload(Command::Ack, &[0x16]).unwrap();
        let text = format!("{packet:?}");
        assert!(text.contains("data: [22]"), "{text}");
    }
}
