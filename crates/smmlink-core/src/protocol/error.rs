//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Every candidate port failed to open
    #[error("No candidate port could be opened (tried: {})", tried.join(", "))]
    NoPortAvailable {
        /// Ports attempted, in order
        tried: Vec<String>,
    },

    /// A write was attempted with no port open
    #[error("Serial port is not open")]
    PortNotOpen,

    /// The port did not drain within the write timeout
    #[error("Timed out waiting for bytes to be written")]
    WriteTimeout,

    /// A packet payload is shorter than its code requires
    #[error("Packet 0x{code:02X} too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Packet code
        code: u8,
        /// Minimum payload length for the code
        expected: usize,
        /// Payload length received
        actual: usize,
    },

    /// A payload does not fit the one-byte length field
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Other I/O failure on the port
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
