//! SMM Serial Protocol
//!
//! Implements the binary protocol spoken by SMM bedside monitors over a
//! serial link.
//!
//! Every frame is `AA 55 LEN CODE PAYLOAD(LEN-1) CHECKSUM`, where the
//! checksum is the 8-bit wrapping sum of LEN, CODE and the payload bytes.

mod assembler;
pub mod commands;
mod decoder;
mod error;
mod frame;
mod sequencer;
pub mod serial;
pub(crate) mod transport;

pub use assembler::{FrameAssembler, SmmCodec};
pub use commands::{Request, HANDSHAKE};
pub use decoder::{
    classify_pulse, classify_resp_rate, classify_spo2, decode, EcgFrame, Lead, Packet, PacketCode,
};
pub use error::ProtocolError;
pub use frame::{checksum, verify_checksum, Frame, FrameBuilder, MARKER};
pub use sequencer::{ConnectionSequencer, ConnectionState, TimerKind};
pub use serial::{list_ports, open_port, PortInfo, PROLIFIC_VID};
pub use transport::{SerialTransport, Transport, TransportErrorKind, TransportEvent};

/// Default baud rate for monitor communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Custom baud rate the monitor's USB adapter is switched to after opening,
/// on platforms that allow non-standard rates
pub const CUSTOM_BAUD_RATE: u32 = 375000;

/// Read timeout for the background reader thread in milliseconds
pub const READ_POLL_TIMEOUT_MS: u64 = 100;

/// Largest payload a single frame can carry (LEN is one byte and counts CODE)
pub const MAX_PAYLOAD_SIZE: usize = 254;
