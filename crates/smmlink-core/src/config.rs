//! Monitor configuration
//!
//! Stored as JSON. Every field has a default matching the monitor's fixed
//! protocol parameters, so an empty `{}` file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{CUSTOM_BAUD_RATE, DEFAULT_BAUD_RATE};

/// Errors loading or saving a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to access config file: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid configuration JSON
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Candidate port names, tried in order; the first that opens wins
    pub ports: Vec<String>,

    /// Serial line settings
    pub serial: SerialSettings,

    /// Handshake and polling cadence
    pub timing: TimingConfig,

    /// Measurement persistence
    pub storage: StorageConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ports: vec![
                "/dev/cu.PL2303G-USBtoUART110".to_string(),
                "cu.PL2303G-USBtoUART110".to_string(),
            ],
            serial: SerialSettings::default(),
            timing: TimingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate used to open the port
    pub baud_rate: u32,

    /// Rate switched to after opening, where the platform allows custom rates
    pub baud_override: Option<u32>,

    /// Parity (the monitor uses odd parity)
    pub parity: Parity,

    /// Data bits (5-8)
    pub data_bits: u8,

    /// Stop bits (1 or 2)
    pub stop_bits: u8,

    /// Flow control
    pub flow_control: FlowControl,

    /// Upper bound on waiting for a write to drain, in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            baud_override: cfg!(target_os = "macos").then_some(CUSTOM_BAUD_RATE),
            parity: Parity::Odd,
            data_bits: 8,
            stop_bits: 1,
            flow_control: FlowControl::None,
            write_timeout_ms: 1000,
        }
    }
}

impl SerialSettings {
    /// Write timeout as a duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Handshake and polling cadence, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Period of the handshake timer after the port opens
    pub handshake_interval_ms: u64,

    /// Delay between the handshake and the first poll tick being armed
    pub post_handshake_delay_ms: u64,

    /// Period of the poll burst
    pub poll_interval_ms: u64,

    /// Spacing between requests inside one burst
    pub burst_spacing_ms: u64,

    /// Handshake retry period after a recoverable transport error
    pub reconnect_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            handshake_interval_ms: 1000,
            post_handshake_delay_ms: 2000,
            poll_interval_ms: 5000,
            burst_spacing_ms: 1000,
            reconnect_delay_ms: 2000,
        }
    }
}

impl TimingConfig {
    /// Handshake period
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    /// Post-handshake delay
    pub fn post_handshake_delay(&self) -> Duration {
        Duration::from_millis(self.post_handshake_delay_ms)
    }

    /// Poll period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Spacing between burst requests
    pub fn burst_spacing(&self) -> Duration {
        Duration::from_millis(self.burst_spacing_ms)
    }

    /// Reconnect period
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Measurement persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON-lines file measurements are appended to
    pub path: PathBuf,

    /// Minimum spacing between two physical inserts, in seconds
    pub min_insert_spacing_secs: u64,

    /// Optional HTTP endpoint measurements are also posted to
    pub forward_url: Option<String>,

    /// Device identifier sent along with forwarded measurements
    pub device_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("measurements.jsonl"),
            min_insert_spacing_secs: 3,
            forward_url: None,
            device_id: "UnknownDevice".to_string(),
        }
    }
}

impl StorageConfig {
    /// Minimum insert spacing as a duration
    pub fn min_spacing(&self) -> Duration {
        Duration::from_secs(self.min_insert_spacing_secs)
    }
}
