//! Frame assembly from a raw byte stream
//!
//! Bytes arrive from the serial port in arbitrary chunks. The assembler
//! keeps whatever has not yet been resolved into a frame and resumes on
//! the next chunk.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::{frame::verify_checksum, Frame, ProtocolError, MARKER};

/// Smallest span that can hold a marker and a LEN byte
const HEADER_SIZE: usize = 4;

/// Codec for SMM frames
///
/// Decoding follows the monitor's resynchronisation rules: anything before
/// a marker is skipped, a buffer with no marker at all is discarded whole,
/// and a frame with a bad checksum is dropped by removing exactly its span.
#[derive(Debug, Default)]
pub struct SmmCodec {
    dropped: u64,
    discarded_bytes: u64,
}

impl SmmCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames dropped because of a checksum mismatch or a zero LEN
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Number of bytes thrown away while hunting for a marker
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }
}

impl Decoder for SmmCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        while src.len() >= HEADER_SIZE {
            let Some(start) = src.windows(MARKER.len()).position(|w| w == MARKER) else {
                debug!(bytes = src.len(), "No frame marker in buffer, discarding");
                self.discarded_bytes += src.len() as u64;
                src.clear();
                return Ok(None);
            };

            if start > 0 {
                self.discarded_bytes += start as u64;
                src.advance(start);
            }

            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let length = src[2];
            let total = MARKER.len() + 1 + length as usize + 1;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let span = src.split_to(total);

            // LEN counts the code byte, so zero leaves no room for one
            if length == 0 {
                debug!("Dropping frame with zero length");
                self.dropped += 1;
                continue;
            }

            let code = span[3];
            let payload = &span[4..total - 1];
            let received = span[total - 1];

            if verify_checksum(length, code, payload, received) {
                return Ok(Some(Frame {
                    length,
                    code,
                    payload: payload.to_vec(),
                    checksum: received,
                }));
            }

            debug!(
                "Dropping frame 0x{:02X} with checksum mismatch (received 0x{:02X})",
                code, received
            );
            self.dropped += 1;
        }

        Ok(None)
    }
}

impl Encoder<&Frame> for SmmCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(frame.encoded_size());
        dst.extend_from_slice(&frame.to_bytes());
        Ok(())
    }
}

/// Accumulates raw bytes and yields every complete, checksum-valid frame
#[derive(Debug, Default)]
pub struct FrameAssembler {
    codec: SmmCodec,
    buffer: BytesMut,
}

impl FrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and extract all frames that are now complete, in
    /// stream order
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        // The codec never fails on input; it only reports "need more data"
        while let Ok(Some(frame)) = self.codec.decode(&mut self.buffer) {
            frames.push(frame);
        }
        frames
    }

    /// Number of bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of frames dropped so far
    pub fn dropped_frames(&self) -> u64 {
        self.codec.dropped_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_frame() -> Vec<u8> {
        vec![0xAA, 0x55, 0x03, 0x01, 0xAA, 0xBB, 0x69]
    }

    #[test]
    fn test_sample_frame_matches_encoder() {
        let encoded = Frame::new(0x01, vec![0xAA, 0xBB]).unwrap().to_bytes();
        assert_eq!(sample_frame(), encoded);
    }

    #[test]
    fn test_single_frame() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.feed(&sample_frame());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].code, 0x01);
        assert_eq!(frames[0].payload, vec![0xAA, 0xBB]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_offset() {
        let bytes = sample_frame();
        for split in 1..bytes.len() {
            let mut assembler = FrameAssembler::new();
            let first = assembler.feed(&bytes[..split]);
            assert!(first.is_empty(), "split at {split} yielded early");
            let second = assembler.feed(&bytes[split..]);
            assert_eq!(second.len(), 1, "split at {split}");
            assert_eq!(second[0].payload, vec![0xAA, 0xBB]);
        }
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut bytes = vec![0x00, 0x13, 0x37];
        bytes.extend(sample_frame());
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.feed(&bytes).len(), 1);
    }

    #[test]
    fn test_no_marker_discards_buffer() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.feed(&[0x01, 0x02, 0x03, 0x04, 0x05]).is_empty());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_short_buffer_is_kept() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.feed(&[0x01, 0x02, 0xAA]).is_empty());
        assert_eq!(assembler.buffered(), 3);
    }

    #[test]
    fn test_bad_checksum_then_good_frame() {
        let mut bytes = sample_frame();
        bytes[6] ^= 0xFF;
        bytes.extend(Frame::new(0x03, vec![0x80]).unwrap().to_bytes());

        let mut assembler = FrameAssembler::new();
        let frames = assembler.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].code, 0x03);
        assert_eq!(assembler.dropped_frames(), 1);
    }

    #[test]
    fn test_zero_length_frame_is_dropped() {
        let mut bytes = vec![0xAA, 0x55, 0x00, 0x00];
        bytes.extend(sample_frame());
        let mut assembler = FrameAssembler::new();
        let frames = assembler.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].code, 0x01);
    }

    #[test]
    fn test_encoder_matches_to_bytes() {
        let frame = Frame::new(0x04, vec![0x01, 0x00]).unwrap();
        let mut dst = BytesMut::new();
        SmmCodec::new().encode(&frame, &mut dst).unwrap();
        assert_eq!(&dst[..], &frame.to_bytes()[..]);
    }
}
