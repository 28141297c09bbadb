//! Bootloader wire protocol.

pub mod crc;
pub mod link;
pub mod packet;

pub use link::{LinkConfig, PacketLink};
pub use packet::{Command, FW_ADDR_LEN, MAX_CHUNK_LEN, MAX_DATA_LEN, Packet, SYNC_BYTES};
