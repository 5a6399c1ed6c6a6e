//! Byte framing for the analyzer wire protocol.
//!
//! # Frame format
//!
//! ```text
//! ┌───────────┬──────────────────────────┬───────────┐
//! │ 0x55 0xAA │ escaped payload          │ 0xAA 0x55 │
//! └───────────┴──────────────────────────┴───────────┘
//! ```
//!
//! The sentinel bytes `0x55`, `0xAA` and the escape byte `0xF0` never appear
//! literally inside a payload; each is emitted as `0xF0` followed by the byte
//! XOR `0xF0`. Every other byte is carried verbatim.

use thiserror::Error;

/// Frame start sentinel.
pub const FRAME_START: [u8; 2] = [0x55, 0xAA];
/// Frame end sentinel.
pub const FRAME_END: [u8; 2] = [0xAA, 0x55];
/// Escape introducer.
pub const ESCAPE: u8 = 0xF0;

/// Framing failures raised by the decoder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid escape code 0x{0:02X}")]
    InvalidEscape(u8),
    #[error("unescaped sentinel byte 0x{0:02X} inside payload")]
    UnescapedSentinel(u8),
    #[error("bad end sentinel: expected 0x55 after 0xAA, got 0x{0:02X}")]
    BadEndSentinel(u8),
}

fn needs_escape(byte: u8) -> bool {
    matches!(byte, 0x55 | 0xAA | ESCAPE)
}

/// Encode a payload into a complete frame.
///
/// The empty payload encodes to exactly `55 AA AA 55`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let escapes = payload.iter().filter(|&&b| needs_escape(b)).count();
    let mut frame = Vec::with_capacity(4 + payload.len() + escapes);

    frame.extend_from_slice(&FRAME_START);
    for &byte in payload {
        if needs_escape(byte) {
            frame.push(ESCAPE);
            frame.push(byte ^ ESCAPE);
        } else {
            frame.push(byte);
        }
    }
    frame.extend_from_slice(&FRAME_END);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Scanning for the first start-sentinel byte.
    Search,
    /// Saw 0x55, expecting 0xAA.
    StartLo,
    /// Inside a frame payload.
    Payload,
    /// Saw the escape introducer, expecting an escape code.
    Escape,
    /// Saw 0xAA inside a frame, expecting the closing 0x55.
    EndHi,
}

/// Resumable frame decoder.
///
/// Feed raw transport bytes in arbitrary chunks; completed payloads are
/// appended to the caller's vector. Partial frames persist across calls, so
/// the decoder works over stream transports that split frames anywhere,
/// including mid-escape.
pub struct FrameDecoder {
    state: DecodeState,
    payload: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Search,
            payload: Vec::new(),
        }
    }

    /// Push a chunk of raw bytes, collecting any completed frame payloads.
    ///
    /// On error the decoder resynchronizes to the next start sentinel, so a
    /// caller may keep feeding after a corrupt frame.
    pub fn push(&mut self, chunk: &[u8], frames: &mut Vec<Vec<u8>>) -> Result<(), FramingError> {
        for &byte in chunk {
            match self.state {
                DecodeState::Search => {
                    if byte == FRAME_START[0] {
                        self.state = DecodeState::StartLo;
                    }
                }
                DecodeState::StartLo => {
                    if byte == FRAME_START[1] {
                        self.payload.clear();
                        self.state = DecodeState::Payload;
                    } else if byte != FRAME_START[0] {
                        // 0x55 0x55 keeps us armed; anything else restarts the scan.
                        self.state = DecodeState::Search;
                    }
                }
                DecodeState::Payload => match byte {
                    ESCAPE => self.state = DecodeState::Escape,
                    0xAA => self.state = DecodeState::EndHi,
                    0x55 => {
                        self.desync();
                        return Err(FramingError::UnescapedSentinel(byte));
                    }
                    _ => self.payload.push(byte),
                },
                DecodeState::Escape => {
                    let decoded = byte ^ ESCAPE;
                    if !needs_escape(decoded) {
                        self.desync();
                        return Err(FramingError::InvalidEscape(byte));
                    }
                    self.payload.push(decoded);
                    self.state = DecodeState::Payload;
                }
                DecodeState::EndHi => {
                    if byte != FRAME_END[1] {
                        self.desync();
                        return Err(FramingError::BadEndSentinel(byte));
                    }
                    frames.push(std::mem::take(&mut self.payload));
                    self.state = DecodeState::Search;
                }
            }
        }
        Ok(())
    }

    /// True while a frame is partially decoded.
    pub fn mid_frame(&self) -> bool {
        !matches!(self.state, DecodeState::Search | DecodeState::StartLo)
    }

    /// Discard any partial frame and rearm the start-sentinel scan.
    pub fn reset(&mut self) {
        self.desync();
    }

    fn desync(&mut self) {
        self.payload.clear();
        self.state = DecodeState::Search;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(data: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        decoder.push(data, &mut frames)?;
        Ok(frames)
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(encode_frame(&[]), vec![0x55, 0xAA, 0xAA, 0x55]);
        let frames = decode_all(&[0x55, 0xAA, 0xAA, 0x55]).unwrap();
        assert_eq!(frames, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_escape_vectors() {
        assert_eq!(encode_frame(&[0xAA]), vec![0x55, 0xAA, 0xF0, 0x5A, 0xAA, 0x55]);
        assert_eq!(encode_frame(&[0x55]), vec![0x55, 0xAA, 0xF0, 0xA5, 0xAA, 0x55]);
        assert_eq!(encode_frame(&[0xF0]), vec![0x55, 0xAA, 0xF0, 0x00, 0xAA, 0x55]);
        assert_eq!(encode_frame(&[0x00]), vec![0x55, 0xAA, 0x00, 0xAA, 0x55]);
    }

    #[test]
    fn test_echo_frame() {
        let encoded = encode_frame(&[0x01, 0x02, 0x03]);
        assert_eq!(encoded, vec![0x55, 0xAA, 0x01, 0x02, 0x03, 0xAA, 0x55]);
        let frames = decode_all(&encoded).unwrap();
        assert_eq!(frames, vec![vec![0x01, 0x02, 0x03]]);
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let payload: Vec<u8> = (0..=255).collect();
        let frames = decode_all(&encode_frame(&payload)).unwrap();
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn test_encoded_length() {
        // 4 + |B| + count of bytes needing escape.
        let payload = [0x12, 0x55, 0x34, 0xAA, 0xF0, 0x56];
        assert_eq!(encode_frame(&payload).len(), 4 + payload.len() + 3);
    }

    #[test]
    fn test_resumable_byte_at_a_time() {
        let payload = [0xAA, 0x01, 0x55, 0xF0, 0x7F];
        let encoded = encode_frame(&payload);

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in encoded {
            decoder.push(&[byte], &mut frames).unwrap();
        }
        assert_eq!(frames, vec![payload.to_vec()]);
        assert!(!decoder.mid_frame());
    }

    #[test]
    fn test_resume_mid_escape() {
        let encoded = encode_frame(&[0xAA]);
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        // Split right after the escape introducer.
        decoder.push(&encoded[..3], &mut frames).unwrap();
        assert!(frames.is_empty());
        assert!(decoder.mid_frame());
        decoder.push(&encoded[3..], &mut frames).unwrap();
        assert_eq!(frames, vec![vec![0xAA]]);
    }

    #[test]
    fn test_multiple_frames_one_chunk() {
        let mut stream = encode_frame(&[1, 2]);
        stream.extend(encode_frame(&[3]));
        stream.extend(encode_frame(&[]));
        let frames = decode_all(&stream).unwrap();
        assert_eq!(frames, vec![vec![1, 2], vec![3], vec![]]);
    }

    #[test]
    fn test_leading_garbage_skipped() {
        let mut stream = vec![0x00, 0x13, 0x55, 0x37];
        stream.extend(encode_frame(&[9]));
        let frames = decode_all(&stream).unwrap();
        assert_eq!(frames, vec![vec![9]]);
    }

    #[test]
    fn test_invalid_escape_rejected() {
        let err = decode_all(&[0x55, 0xAA, 0xF0, 0x42, 0xAA, 0x55]).unwrap_err();
        assert_eq!(err, FramingError::InvalidEscape(0x42));
    }

    #[test]
    fn test_unescaped_start_sentinel_rejected() {
        let err = decode_all(&[0x55, 0xAA, 0x01, 0x55]).unwrap_err();
        assert_eq!(err, FramingError::UnescapedSentinel(0x55));
    }

    #[test]
    fn test_bad_end_sentinel_rejected() {
        let err = decode_all(&[0x55, 0xAA, 0x01, 0xAA, 0x99]).unwrap_err();
        assert_eq!(err, FramingError::BadEndSentinel(0x99));
    }

    #[test]
    fn test_resync_after_error() {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        assert!(decoder.push(&[0x55, 0xAA, 0x01, 0x55], &mut frames).is_err());
        decoder.push(&encode_frame(&[7, 8]), &mut frames).unwrap();
        assert_eq!(frames, vec![vec![7, 8]]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        decoder.push(&[0x55, 0xAA, 0x01, 0x02], &mut frames).unwrap();
        assert!(decoder.mid_frame());
        decoder.reset();
        assert!(!decoder.mid_frame());
        decoder.push(&encode_frame(&[4]), &mut frames).unwrap();
        assert_eq!(frames, vec![vec![4]]);
    }
}
