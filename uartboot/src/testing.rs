//! In-memory ports for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};

use crate::error::Result;
use crate::port::Port;
use crate::protocol::crc::checksum;
use crate::protocol::{Command, FW_ADDR_LEN, MAX_DATA_LEN, Packet, SYNC_BYTES};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Checksum of a frame whose first `len` data bytes are `payload`.
fn frame_checksum(cmd: u8, len: u8, payload: &[u8]) -> u8 {
    let mut data = [0u8; MAX_DATA_LEN];
    data[..payload.len()].copy_from_slice(payload);
    checksum(cmd, len, &data)
}

/// Device-style packet with no data bytes.
pub(crate) fn bare(cmd: Command) -> Packet {
    Packet::from_wire(cmd, 0, &[], frame_checksum(cmd.into(), 0, &[]))
}

/// Acknowledgement echoing `cmd`.
pub(crate) fn ack(cmd: Command) -> Packet {
    let code = u8::from(cmd);
    Packet::from_wire(
        Command::Ack,
        1,
        &[code],
        frame_checksum(Command::Ack.into(), 1, &[code]),
    )
}

/// Port replaying a fixed byte script and recording everything written.
pub(crate) struct MockPort {
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
    writes: usize,
    clears: usize,
}

impl MockPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            write_buf: Vec::new(),
            writes: 0,
            clears: 0,
        }
    }

    pub(crate) fn with_packets(packets: &[Packet]) -> Self {
        let bytes: Vec<u8> = packets.iter().flat_map(Packet::build).collect();
        Self::new(&bytes)
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.write_buf
    }

    /// Number of `write_all_bytes` calls.
    pub(crate) fn write_count(&self) -> usize {
        self.writes
    }

    pub(crate) fn remaining(&self) -> usize {
        self.read_buf.len()
    }

    /// Number of `clear_input` calls.
    pub(crate) fn clear_count(&self) -> usize {
        self.clears
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for (dst, src) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    #[allow(clippy::cast_possible_truncation)]
    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(self.read_buf.len() as u32)
    }

    // Scripted bytes stand for later replies, so nothing is pending yet.
    fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.writes += 1;
        self.write_all(buf)?;
        Ok(())
    }
}

pub(crate) const APP_START_ADDR: u32 = 0x8000;
const FW_MAX_SIZE: u32 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceState {
    Sync,
    WaitUpdateReq,
    WaitFwLen,
    WaitFwData,
    Done,
    Failed,
}

/// Port backed by a bootloader state machine.
///
/// Bytes written by the host are parsed as the bootloader would: raw bytes
/// until the sync marker, then framed packets. Each packet with a valid
/// checksum is acknowledged before the state machine reacts to it; a bad
/// checksum is answered with a retransmission request.
pub(crate) struct SimulatedDevice {
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    sync_window: [u8; 4],
    state: DeviceState,
    fw_len: u32,
    fw_written: u32,
    version: u8,
    /// Flash image as written, indexed from `APP_START_ADDR`.
    pub(crate) memory: Vec<u8>,
    /// Address and length of every accepted memory write.
    pub(crate) writes: Vec<(u32, usize)>,
    /// Number of valid frames received.
    pub(crate) frames: usize,
    /// Upcoming frames to treat as corrupted.
    corrupt_frames: usize,
    nack_command: Option<Command>,
    wrong_echo: Option<Command>,
    hold_ready: bool,
    closed: bool,
}

impl SimulatedDevice {
    pub(crate) fn new() -> Self {
        Self {
            rx: Vec::new(),
            tx: VecDeque::new(),
            sync_window: [0; 4],
            state: DeviceState::Sync,
            fw_len: 0,
            fw_written: 0,
            version: 0x01,
            memory: Vec::new(),
            writes: Vec::new(),
            frames: 0,
            corrupt_frames: 0,
            nack_command: None,
            wrong_echo: None,
            hold_ready: false,
            closed: false,
        }
    }

    pub(crate) fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Answer the next `count` frames with RETX regardless of checksum.
    pub(crate) fn corrupt_next(mut self, count: usize) -> Self {
        self.corrupt_frames = count;
        self
    }

    /// Answer `cmd` with NACK instead of ACK.
    pub(crate) fn nack_on(mut self, cmd: Command) -> Self {
        self.nack_command = Some(cmd);
        self
    }

    /// Acknowledge `cmd` with the code of a different command.
    pub(crate) fn wrong_echo_on(mut self, cmd: Command) -> Self {
        self.wrong_echo = Some(cmd);
        self
    }

    /// Leave `bytes` in the host's receive buffer before anything is sent.
    pub(crate) fn with_stale_output(mut self, bytes: &[u8]) -> Self {
        self.tx.extend(bytes);
        self
    }

    /// Never announce readiness for firmware data.
    pub(crate) fn hold_ready(mut self) -> Self {
        self.hold_ready = true;
        self
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn send(&mut self, packet: &Packet) {
        self.tx.extend(packet.build());
    }

    fn process(&mut self) {
        if self.state == DeviceState::Sync {
            let mut consumed = 0;
            for &byte in &self.rx {
                consumed += 1;
                self.sync_window.rotate_left(1);
                self.sync_window[3] = byte;
                if self.sync_window == SYNC_BYTES {
                    self.state = DeviceState::WaitUpdateReq;
                    break;
                }
            }
            self.rx.drain(..consumed);
        }
        if self.state == DeviceState::Sync {
            return;
        }

        while self.rx.len() >= 2 {
            let total = usize::from(self.rx[1]) + 3;
            if self.rx.len() < total {
                break;
            }
            let frame: Vec<u8> = self.rx.drain(..total).collect();
            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let len = frame[1];
        let data = &frame[2..frame.len() - 1];
        let received = frame[frame.len() - 1];
        let valid = frame_checksum(frame[0], len, data) == received;

        if self.corrupt_frames > 0 || !valid {
            self.corrupt_frames = self.corrupt_frames.saturating_sub(1);
            self.send(&bare(Command::Retx));
            return;
        }
        self.frames += 1;

        let Ok(cmd) = Command::try_from(frame[0]) else {
            self.send(&bare(Command::Nack));
            return;
        };
        if self.nack_command == Some(cmd) {
            self.send(&bare(Command::Nack));
            return;
        }
        if self.wrong_echo == Some(cmd) {
            self.send(&ack(Command::GetId));
            return;
        }
        self.send(&ack(cmd));

        self.state = match (self.state, cmd) {
            (DeviceState::WaitUpdateReq, Command::GetVersion) => {
                let reply = Packet::with_payload(Command::GetVersion, &[self.version])
                    .unwrap_or_else(|_| bare(Command::Nack));
                self.send(&reply);
                DeviceState::WaitUpdateReq
            },
            (DeviceState::WaitUpdateReq, Command::UpdateReq) => {
                self.send(&bare(Command::FwLenReq));
                DeviceState::WaitFwLen
            },
            (DeviceState::WaitFwLen, Command::FwLenResp) => {
                self.fw_len = BigEndian::read_u32(data);
                if self.fw_len > FW_MAX_SIZE {
                    self.fail()
                } else {
                    self.memory = vec![0xFF; self.fw_len as usize];
                    if !self.hold_ready {
                        self.send(&bare(Command::WriteDataRdy));
                    }
                    DeviceState::WaitFwData
                }
            },
            (DeviceState::WaitFwData, Command::WriteMem) => self.write_memory(data),
            (state, _) => state,
        };
    }

    fn write_memory(&mut self, data: &[u8]) -> DeviceState {
        let addr = BigEndian::read_u32(data);
        let chunk = &data[FW_ADDR_LEN..];
        let end = addr as usize + chunk.len();
        if addr < APP_START_ADDR || end > (APP_START_ADDR + self.fw_len) as usize {
            return self.fail();
        }
        let offset = (addr - APP_START_ADDR) as usize;
        self.memory[offset..offset + chunk.len()].copy_from_slice(chunk);
        self.writes.push((addr, chunk.len()));
        self.fw_written += chunk.len() as u32;

        if self.fw_written >= self.fw_len {
            self.send(&bare(Command::FwUpdateDone));
            DeviceState::Done
        } else {
            self.send(&bare(Command::WriteDataRdy));
            DeviceState::WaitFwData
        }
    }

    fn fail(&mut self) -> DeviceState {
        self.send(&bare(Command::Nack));
        DeviceState::Failed
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.tx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.tx.len());
        for (dst, src) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rx.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedDevice {
    #[allow(clippy::cast_possible_truncation)]
    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(self.tx.len() as u32)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.tx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Port whose scripted bytes only become readable after a delay.
pub(crate) struct DelayedPort {
    bytes: VecDeque<u8>,
    opened: Instant,
    release_after: Duration,
}

impl DelayedPort {
    pub(crate) fn new(bytes: &[u8], release_after: Duration) -> Self {
        Self {
            bytes: bytes.iter().copied().collect(),
            opened: Instant::now(),
            release_after,
        }
    }

    fn released(&self) -> bool {
        self.opened.elapsed() >= self.release_after
    }
}

impl Read for DelayedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.released() || self.bytes.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.bytes.len());
        for (dst, src) in buf.iter_mut().zip(self.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for DelayedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for DelayedPort {
    #[allow(clippy::cast_possible_truncation)]
    fn bytes_to_read(&mut self) -> Result<u32> {
        if self.released() {
            Ok(self.bytes.len() as u32)
        } else {
            Ok(0)
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "delayed"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
