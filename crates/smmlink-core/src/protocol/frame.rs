//! Frame encoding and checksums
//!
//! Frame format:
//! - 2 bytes: marker `0xAA 0x55`
//! - 1 byte: LEN, the number of bytes in CODE + PAYLOAD
//! - 1 byte: CODE, the packet code
//! - LEN-1 bytes: payload
//! - 1 byte: checksum, `(LEN + CODE + sum(PAYLOAD)) mod 256`

use byteorder::{BigEndian, ByteOrder};

use super::{ProtocolError, MAX_PAYLOAD_SIZE};

/// Two-byte marker that starts every frame
pub const MARKER: [u8; 2] = [0xAA, 0x55];

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// LEN byte: payload length plus one for the code
    pub length: u8,
    /// Packet code
    pub code: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Checksum byte as sent or received
    pub checksum: u8,
}

impl Frame {
    /// Create a frame with a freshly computed checksum
    pub fn new(code: u8, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        Ok(Self::sealed(code, payload))
    }

    /// Fill in LEN and the checksum; `payload` must fit in one LEN byte
    pub(crate) fn sealed(code: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        let length = payload.len() as u8 + 1;
        let checksum = checksum(length, code, &payload);
        Self {
            length,
            code,
            payload,
            checksum,
        }
    }

    /// True when the stored checksum and length agree with the contents
    pub fn is_valid(&self) -> bool {
        self.payload.len() + 1 == self.length as usize
            && verify_checksum(self.length, self.code, &self.payload, self.checksum)
    }

    /// Encode the frame to raw bytes, marker included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.extend_from_slice(&MARKER);
        bytes.push(self.length);
        bytes.push(self.code);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum);
        bytes
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        MARKER.len() + 1 + 1 + self.payload.len() + 1
    }
}

/// Builder for request frames
pub struct FrameBuilder {
    code: u8,
    payload: Vec<u8>,
}

impl FrameBuilder {
    /// Start a frame with the given packet code
    pub fn new(code: u8) -> Self {
        Self {
            code,
            payload: Vec::new(),
        }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a 16-bit value (big-endian)
    pub fn u16_be(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Build the frame
    pub fn build(self) -> Result<Frame, ProtocolError> {
        Frame::new(self.code, self.payload)
    }
}

/// Compute the frame checksum over LEN, CODE and the payload
pub fn checksum(length: u8, code: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(length.wrapping_add(code), |acc, &b| acc.wrapping_add(b))
}

/// Check a received checksum byte against the frame contents
pub fn verify_checksum(length: u8, code: u8, payload: &[u8], received: u8) -> bool {
    checksum(length, code, payload) == received
}
