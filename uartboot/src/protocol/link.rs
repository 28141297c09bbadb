//! Confirmed packet exchange over a [`Port`].
//!
//! Every command the host sends is answered by the device with either an
//! acknowledgement echoing the command code, a negative acknowledgement, or a
//! retransmission request. A retransmission request makes the host write the
//! very same frame again; the number of such rewrites per exchange is bounded
//! by [`LinkConfig::max_retransmits`].
//!
//! Receiving is a poll on [`Port::bytes_to_read`] against a deadline taken
//! once at the start of the receive call, covering both the two header bytes
//! and the payload plus checksum.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::packet::{Command, MAX_DATA_LEN, Packet, SYNC_BYTES};

/// Link timing and retry options.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Deadline for one complete response packet.
    pub response_timeout: Duration,
    /// Sleep between two polls of the receive buffer.
    pub poll_interval: Duration,
    /// Maximum number of retransmissions within one exchange.
    pub max_retransmits: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
            max_retransmits: 16,
        }
    }
}

/// Packet exchange handler.
pub struct PacketLink<'a, P: Port + ?Sized> {
    port: &'a mut P,
    config: LinkConfig,
}

impl<'a, P: Port + ?Sized> PacketLink<'a, P> {
    /// Create a new link with default options.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: LinkConfig::default(),
        }
    }

    /// Create a new link with custom options.
    pub fn with_config(port: &'a mut P, config: LinkConfig) -> Self {
        Self { port, config }
    }

    /// Write the raw sync marker. No response is expected.
    pub fn send_sync(&mut self) -> Result<()> {
        self.port.write_all_bytes(&SYNC_BYTES)?;
        debug!("Sent sync");
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        trace!("TX {frame:02X?}");
        self.port.write_all_bytes(frame)
    }

    /// Receive one packet within the configured response timeout.
    pub fn receive_packet(&mut self) -> Result<Packet> {
        self.receive_packet_within(self.config.response_timeout)
    }

    /// Receive one packet within `timeout`.
    ///
    /// The checksum byte is read and kept but not verified.
    pub fn receive_packet_within(&mut self, timeout: Duration) -> Result<Packet> {
        let start = Instant::now();

        self.wait_for_bytes(2, start, timeout)?;
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header)?;
        let cmd = Command::try_from(header[0])?;
        let len = usize::from(header[1]);

        self.wait_for_bytes(len + 1, start, timeout)?;
        let mut body = [0u8; MAX_DATA_LEN + 1];
        self.port.read_exact(&mut body[..=len])?;

        let packet = Packet::from_wire(cmd, header[1], &body[..len], body[len]);
        debug!("Received {packet:?}");
        Ok(packet)
    }

    fn wait_for_bytes(&mut self, needed: usize, start: Instant, timeout: Duration) -> Result<()> {
        loop {
            let available = usize::try_from(self.port.bytes_to_read()?).unwrap_or(usize::MAX);
            if available >= needed {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(Error::Timeout(format!(
                    "{available} of {needed} bytes after {} ms",
                    timeout.as_millis()
                )));
            }
            if self.config.poll_interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.config.poll_interval);
            }
        }
    }

    /// Send a packet and wait for the device to acknowledge it.
    ///
    /// Retransmission requests are answered by rewriting the original frame
    /// bytes. Fails on NACK, on any other non-ACK response, and on an ACK
    /// echoing a different command.
    pub fn send_and_confirm(&mut self, packet: &Packet) -> Result<()> {
        let command = packet.command_type();
        let frame = packet.build();

        debug!("Sending {packet:?}");
        self.write_frame(&frame)?;
        let mut response = self.receive_packet()?;

        let mut retransmits = 0;
        while response.command_type() == Command::Retx {
            if retransmits >= self.config.max_retransmits {
                return Err(Error::RetransmitLimit {
                    command,
                    attempts: retransmits,
                });
            }
            retransmits += 1;
            warn!(
                "Retransmitting {command} ({retransmits}/{})",
                self.config.max_retransmits
            );
            self.write_frame(&frame)?;
            response = self.receive_packet()?;
        }

        check_ack(command, &response)
    }

    /// Send a confirmed request and return the device's follow-up packet.
    ///
    /// When the follow-up is a retransmission request, the whole request is
    /// sent and confirmed again before reading the next follow-up.
    pub fn request(&mut self, packet: &Packet) -> Result<Packet> {
        let command = packet.command_type();

        self.send_and_confirm(packet)?;
        let mut response = self.receive_packet()?;

        let mut retransmits = 0;
        while response.command_type() == Command::Retx {
            if retransmits >= self.config.max_retransmits {
                return Err(Error::RetransmitLimit {
                    command,
                    attempts: retransmits,
                });
            }
            retransmits += 1;
            warn!("Retransmitting {command} request");
            self.send_and_confirm(packet)?;
            response = self.receive_packet()?;
        }

        Ok(response)
    }
}

fn check_ack(sent: Command, response: &Packet) -> Result<()> {
    match response.command_type() {
        Command::Ack => {},
        Command::Nack => return Err(Error::NegativeAcknowledge(sent)),
        actual => {
            return Err(Error::UnexpectedResponse {
                expected: Command::Ack,
                actual,
            });
        },
    }

    // A missing echo byte reads as 0x00, which is never a valid command.
    let echoed = response.payload().first().copied().unwrap_or(0);
    if echoed != u8::from(sent) {
        return Err(Error::CommandMismatch { sent, echoed });
    }

    trace!("{sent} acknowledged");
    Ok(())
}
