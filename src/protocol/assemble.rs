//! Capture command assembly.
//!
//! Turns a validated [`CaptureSession`] into the framed byte sequence that
//! starts a capture: trigger template from the trigger engine, channel map
//! and rate fields filled here, struct layout from [`request`], envelope
//! from [`frame`].

use crate::protocol::frame::encode_frame;
use crate::protocol::request::CaptureRequest;
use crate::session::CaptureSession;
use crate::trigger::compose_trigger_request;

/// Build the complete wire request for a session.
///
/// The session must already have passed trigger validation; assembly itself
/// performs no checks.
pub fn assemble_capture_request(session: &CaptureSession) -> CaptureRequest {
    let mut request = compose_trigger_request(session);

    for channel in &session.capture_channels {
        if let Some(slot) = request.channels.get_mut(channel.channel_number as usize) {
            *slot = 1;
        }
    }
    request.channel_count = session.capture_channels.len() as u8;
    request.frequency = session.frequency;
    request.loop_count = session.loop_count;
    request.measure = session.measure_bursts as u8;
    request
}

/// Encode and frame the start-capture command.
pub fn capture_command_bytes(session: &CaptureSession) -> Vec<u8> {
    encode_frame(&assemble_capture_request(session).encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{FrameDecoder, FRAME_START};
    use crate::session::{AnalyzerChannel, TriggerType};

    fn minimum_session() -> CaptureSession {
        CaptureSession {
            frequency: 24_000_000,
            pre_trigger_samples: 1_000,
            post_trigger_samples: 9_000,
            loop_count: 0,
            trigger_type: TriggerType::Edge,
            trigger_channel: 0,
            capture_channels: (0..8).map(AnalyzerChannel::new).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_channel_map_and_count() {
        let mut session = minimum_session();
        session.capture_channels = vec![
            AnalyzerChannel::new(0),
            AnalyzerChannel::new(2),
            AnalyzerChannel::new(15),
        ];
        let request = assemble_capture_request(&session);

        let mut expected = [0u8; 24];
        expected[0] = 1;
        expected[2] = 1;
        expected[15] = 1;
        assert_eq!(request.channels, expected);
        assert_eq!(request.channel_count, 3);
        assert_eq!(request.capture_mode, 1);
    }

    #[test]
    fn test_minimum_capture_request_fields() {
        // Framed request for the 24 MHz, 1000/9000, 8-channel edge session.
        let framed = capture_command_bytes(&minimum_session());
        assert_eq!(&framed[..2], &FRAME_START);

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        decoder.push(&framed, &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        let inner = &frames[0];
        assert_eq!(inner.len(), CaptureRequest::SIZE);

        assert_eq!(
            u32::from_le_bytes([inner[30], inner[31], inner[32], inner[33]]),
            24_000_000
        );
        assert_eq!(
            u32::from_le_bytes([inner[34], inner[35], inner[36], inner[37]]),
            1_000
        );
        assert_eq!(
            u32::from_le_bytes([inner[38], inner[39], inner[40], inner[41]]),
            9_000
        );
        assert_eq!(inner[44], 0);
    }

    #[test]
    fn test_measure_and_loop_fields() {
        let mut session = minimum_session();
        session.loop_count = 3;
        session.measure_bursts = true;
        let request = assemble_capture_request(&session);
        assert_eq!(request.loop_count, 3);
        assert_eq!(request.measure, 1);
    }
}
