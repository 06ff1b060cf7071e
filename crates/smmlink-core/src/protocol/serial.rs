//! Serial port handling
//!
//! Provides low-level serial port access for the bedside monitor.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tracing::{info, warn};

use super::ProtocolError;
use crate::config::{FlowControl, Parity, SerialSettings};

/// Prolific, maker of the PL2303 USB-to-UART bridge the monitor ships with
pub const PROLIFIC_VID: u16 = 0x067B;

/// A serial port that could reach the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyUSB0` or `/dev/cu.PL2303G-USBtoUART110`
    pub name: String,
    /// USB vendor and product id, when the port is a USB adapter
    pub usb_id: Option<(u16, u16)>,
    /// Adapter description reported by the OS
    pub description: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            usb_id: None,
            description: None,
        }
    }

    /// Whether this looks like the monitor's own cable
    pub fn is_monitor_adapter(&self) -> bool {
        matches!(self.usb_id, Some((PROLIFIC_VID, _))) || basename(&self.name).contains("PL2303")
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                usb_id: Some((usb.vid, usb.pid)),
                description: usb.product.or(usb.manufacturer),
            },
            _ => Self::bare(info.port_name),
        }
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Candidates in the order a user should try them: the monitor's adapter,
/// then USB serial, then CDC-ACM, then the rest
fn rank(port: &PortInfo) -> (u8, usize, String) {
    let base = basename(&port.name);
    let numbered = |prefix: &str| {
        base.strip_prefix(prefix)
            .map(|n| n.parse::<usize>().unwrap_or(usize::MAX))
    };
    if port.is_monitor_adapter() {
        return (0, 0, base.to_string());
    }
    if let Some(n) = numbered("ttyUSB") {
        return (1, n, base.to_string());
    }
    if let Some(n) = numbered("ttyACM") {
        return (2, n, base.to_string());
    }
    (3, 0, base.to_string())
}

fn sort_candidates(ports: impl IntoIterator<Item = PortInfo>) -> Vec<PortInfo> {
    let mut unique: HashMap<String, PortInfo> = HashMap::new();
    for port in ports {
        unique.entry(port.name.clone()).or_insert(port);
    }
    let mut ports: Vec<PortInfo> = unique.into_values().collect();
    ports.sort_by_key(rank);
    ports
}

/// Serial ports that could reach the monitor, best candidates first
pub fn list_ports() -> Vec<PortInfo> {
    let enumerated = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from);
    sort_candidates(enumerated.chain(dev_nodes()))
}

/// USB serial nodes udev has not announced yet
#[cfg(target_os = "linux")]
fn dev_nodes() -> Vec<PortInfo> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|f| f.starts_with("ttyUSB") || f.starts_with("ttyACM"))
        .map(|f| PortInfo::bare(format!("/dev/{f}")))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn dev_nodes() -> Vec<PortInfo> {
    Vec::new()
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits, ProtocolError> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(ProtocolError::SerialError(format!(
            "unsupported data bits: {other}"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<serialport::StopBits, ProtocolError> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        other => Err(ProtocolError::SerialError(format!(
            "unsupported stop bits: {other}"
        ))),
    }
}

/// Open and configure a serial port for the monitor
///
/// The custom baud override is applied after opening; failing to apply it
/// is logged and the port stays at the base rate.
pub fn open_port(
    name: &str,
    settings: &SerialSettings,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(name, settings.baud_rate)
        .data_bits(data_bits(settings.data_bits)?)
        .parity(settings.parity.into())
        .stop_bits(stop_bits(settings.stop_bits)?)
        .flow_control(settings.flow_control.into())
        .timeout(settings.write_timeout())
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    if let Some(baud) = settings.baud_override {
        match port.set_baud_rate(baud) {
            Ok(()) => info!(port = name, baud, "Custom baud rate applied"),
            Err(e) => warn!(port = name, baud, "Custom baud rate could not be set: {}", e),
        }
    }

    clear_buffers(port.as_mut())?;
    Ok(port)
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}
