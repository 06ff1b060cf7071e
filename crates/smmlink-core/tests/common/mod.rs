#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use smmlink_core::config::{MonitorConfig, SerialSettings};
use smmlink_core::protocol::{Frame, FrameBuilder, ProtocolError, Transport};

/// Everything a mock transport saw, shared with the test after the
/// transport has been moved into a monitor
#[derive(Debug, Default)]
pub struct Wire {
    pub opened: Vec<String>,
    pub written: Vec<Vec<u8>>,
    pub closes: usize,
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
    open: bool,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<Mutex<Wire>>) {
        let transport = Self::default();
        let wire = transport.wire.clone();
        (transport, wire)
    }
}

impl Transport for MockTransport {
    fn open(&mut self, port: &str, _settings: &SerialSettings) -> Result<(), ProtocolError> {
        let mut wire = self.wire.lock().unwrap();
        wire.opened.push(port.to_string());
        if wire.unavailable.iter().any(|p| p == port) {
            return Err(ProtocolError::SerialError(format!("{port}: not found")));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::PortNotOpen);
        }
        self.wire.lock().unwrap().written.push(data.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.wire.lock().unwrap().closes += 1;
        }
    }
}

pub fn config() -> MonitorConfig {
    MonitorConfig {
        ports: vec!["/dev/ttyUSB0".to_string()],
        ..MonitorConfig::default()
    }
}

/// Encode a frame the way the monitor sends it
pub fn wire(code: u8, payload: &[u8]) -> Vec<u8> {
    Frame::new(code, payload.to_vec()).unwrap().to_bytes()
}

pub fn resp_rate(rr: u8) -> Vec<u8> {
    wire(0x04, &[0, 0, 0, 0, rr, 0])
}

pub fn oximetry(spo2: u8, pulse: u16) -> Vec<u8> {
    FrameBuilder::new(0x15)
        .bytes(&[0x00, 0x60, 0x00])
        .byte(spo2)
        .u16_be(pulse)
        .build()
        .unwrap()
        .to_bytes()
}
