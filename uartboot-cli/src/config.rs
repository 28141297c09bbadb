//! Configuration file support for uartboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (UARTBOOT_*)
//! 3. Local config file (./uartboot.toml)
//! 4. Global config file (e.g. ~/.config/uartboot/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "uartboot.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB devices treated as bootloader bridges.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Flash sequence defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashSection {
    /// Address of the first image byte.
    pub start_address: Option<u32>,
    /// Response timeout in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Retransmission bound per exchange.
    pub max_retransmits: Option<u32>,
    /// Query the bootloader version before updating.
    #[serde(default)]
    pub query_version: bool,
}

impl FlashSection {
    /// Response timeout, if configured.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashSection,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        Self::load_layered(
            Self::global_config_path().as_deref(),
            Path::new(LOCAL_CONFIG_FILE),
        )
    }

    /// Load `global` and then `local`, later values overriding earlier ones.
    fn load_layered(global: Option<&Path>, local: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = global {
            if let Some(global_config) = Self::load_from_file(global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(local) {
            debug!("Loaded local config from {}", local.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "uartboot").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        if other.flash.start_address.is_some() {
            self.flash.start_address = other.flash.start_address;
        }
        if other.flash.response_timeout_ms.is_some() {
            self.flash.response_timeout_ms = other.flash.response_timeout_ms;
        }
        if other.flash.max_retransmits.is_some() {
            self.flash.max_retransmits = other.flash.max_retransmits;
        }
        if other.flash.query_version {
            self.flash.query_version = true;
        }
    }

    /// Whether `vid:pid` was registered as a bootloader bridge.
    pub fn is_registered_device(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid))
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };
        self.remember_usb_device_in(&path, vid, pid)
    }

    fn remember_usb_device_in(&mut self, path: &Path, vid: u16, pid: u16) -> anyhow::Result<()> {
        if self.is_registered_device(vid, pid) {
            return Ok(());
        }

        // Keep whatever else the file already holds
        let mut stored = Self::load_from_file(path).unwrap_or_default();
        stored.port.usb_device.push(UsbDevice { vid, pid });
        fs::write(path, toml::to_string_pretty(&stored)?)?;

        self.port.usb_device.push(UsbDevice { vid, pid });
        info!("Saved USB device {vid:04X}:{pid:04X} to {}", path.display());
        Ok(())
    }
}
