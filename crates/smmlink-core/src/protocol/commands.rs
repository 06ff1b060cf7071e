//! Protocol commands
//!
//! The monitor has no request/response pairing. After the handshake it
//! expects a fixed burst of four request frames, repeated periodically,
//! and streams data frames back on its own schedule.

use serde::{Deserialize, Serialize};

use super::Frame;

/// Handshake bytes written once per connection attempt, unframed
pub const HANDSHAKE: [u8; 3] = [0xBF, 0x5F, 0xFF];

/// ECG setup: lead selection, filter and gain configuration
const ECG_SETUP_PAYLOAD: [u8; 11] = [
    0x02, 0x03, 0x03, 0x03, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x01,
];

/// Vitals reporting enable
const VITALS_REPORT_PAYLOAD: [u8; 2] = [0x01, 0x00];

/// Request frames sent in each poll burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// ECG lead / filter / gain setup (code 0x01)
    EcgSetup,

    /// Empty request sent between ECG setup and respiration enable (code 0x02)
    Reserved02,

    /// Enable the respiration waveform stream (code 0x03)
    RespirationWaveform,

    /// Enable numeric vitals reporting (code 0x04)
    VitalsReport,
}

impl Request {
    /// Requests in the order they are sent during a burst
    pub const BURST: [Request; 4] = [
        Request::EcgSetup,
        Request::Reserved02,
        Request::RespirationWaveform,
        Request::VitalsReport,
    ];

    /// Packet code of this request
    pub fn code(&self) -> u8 {
        match self {
            Request::EcgSetup => 0x01,
            Request::Reserved02 => 0x02,
            Request::RespirationWaveform => 0x03,
            Request::VitalsReport => 0x04,
        }
    }

    /// Fixed payload of this request
    pub fn payload(&self) -> &'static [u8] {
        match self {
            Request::EcgSetup => &ECG_SETUP_PAYLOAD,
            Request::Reserved02 | Request::RespirationWaveform => &[],
            Request::VitalsReport => &VITALS_REPORT_PAYLOAD,
        }
    }

    /// Build the request frame
    pub fn to_frame(&self) -> Frame {
        Frame::sealed(self.code(), self.payload().to_vec())
    }

    /// Encoded bytes of the whole burst, one entry per request
    pub fn burst_bytes() -> Vec<Vec<u8>> {
        Self::BURST.iter().map(|r| r.to_frame().to_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_burst_encoding() {
        let burst = Request::burst_bytes();
        assert_eq!(burst.len(), 4);
        assert_eq!(
            burst[0],
            vec![
                0xAA, 0x55, 0x0C, 0x01, 0x02, 0x03, 0x03, 0x03, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01,
                0x01, 0x20
            ]
        );
        assert_eq!(burst[1], vec![0xAA, 0x55, 0x01, 0x02, 0x03]);
        assert_eq!(burst[2], vec![0xAA, 0x55, 0x01, 0x03, 0x04]);
        assert_eq!(burst[3], vec![0xAA, 0x55, 0x03, 0x04, 0x01, 0x00, 0x08]);
    }

    #[test]
    fn test_request_frames_are_valid() {
        for request in Request::BURST {
            let frame = request.to_frame();
            assert!(frame.is_valid(), "{:?}", request);
            assert_eq!(
                frame,
                Frame::new(request.code(), request.payload().to_vec()).unwrap()
            );
        }
    }
}
