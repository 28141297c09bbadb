//! Serial port discovery.
//!
//! Bootloader boards are normally reached through a USB-to-UART bridge.
//! Enumerated ports are classified by USB VID/PID so a recognized bridge can
//! be picked without asking.

use crate::port::PortInfo;

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB-to-UART bridge chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BridgeKind {
    /// WCH CH340/CH341.
    Ch340,
    /// Silicon Labs CP210x.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232.
    Ftdi,
    /// Prolific PL2303.
    Prolific,
    /// Not a recognized bridge.
    Unknown,
}

const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], BridgeKind::Ch340),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], BridgeKind::Ftdi),
    (0x067B, &[0x2303, 0x23A3], BridgeKind::Prolific),
];

impl BridgeKind {
    /// Classify a VID/PID pair.
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_BRIDGES
            .iter()
            .find(|(known_vid, pids, _)| *known_vid == vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognized bridge.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

/// An enumerated port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedPort {
    /// Port metadata as enumerated.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub info: PortInfo,
    /// Bridge classification.
    pub bridge: BridgeKind,
}

impl DetectedPort {
    /// Classify an enumerated port.
    pub fn classify(info: PortInfo) -> Self {
        let bridge = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => BridgeKind::from_vid_pid(vid, pid),
            _ => BridgeKind::Unknown,
        };
        Self { info, bridge }
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        let mut line = self.info.name.clone();
        if self.bridge.is_known() {
            line.push_str(&format!(" [{}]", self.bridge.name()));
        } else if let (Some(vid), Some(pid)) = (self.info.vid, self.info.pid) {
            line.push_str(&format!(" [VID:{vid:04X} PID:{pid:04X}]"));
        }
        if let Some(ref product) = self.info.product {
            line.push_str(" - ");
            line.push_str(product);
        }
        line
    }
}

/// Enumerate and classify all serial ports.
///
/// Enumeration failures are logged and yield an empty list.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let detected = DetectedPort::classify(info);
                trace!("Found port: {}", detected.describe());
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}
