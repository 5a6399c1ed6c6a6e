//! Sample stream parsing.
//!
//! The device answers a capture with one deframed payload: a declared sample
//! count, then one mode-width word per sample, then an optional burst tail
//! when burst measurement was armed. Bit `k` of each word is the value of the
//! `k`-th channel in capture order, so channel extraction is positional and
//! independent of the channel numbers themselves.
//!
//! ```text
//! u32le  total_samples
//! total_samples × word      1/2/4 bytes by capture mode
//! [ u16le burst_count
//!   burst_count × record    u32le start, u32le end, u64le gap, u64le ns ]
//! ```

use log::debug;
use thiserror::Error;

use crate::session::{BurstInfo, CaptureSession};

/// Payload shape disagrees with what the session expects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("device declared {declared} samples, session expects {expected}")]
    SampleCountMismatch { declared: u32, expected: u64 },
    #[error("{0} unexpected trailing bytes after capture payload")]
    TrailingBytes(usize),
}

/// Summary of one parsed capture payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOutcome {
    pub total_samples: u64,
    /// Caller-visible trigger position, realigned for the trigger delay.
    pub trigger_index: u32,
    pub burst_count: usize,
}

const BURST_RECORD_SIZE: usize = 24;

fn need(payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() < expected {
        return Err(ProtocolError::Truncated {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Parse one complete capture payload into the session's channel buffers.
///
/// Restartable per session: buffers are reallocated on every call, so a
/// retried transfer overwrites any partial result. Identical input produces
/// identical output.
pub fn parse_capture_payload(
    session: &mut CaptureSession,
    payload: &[u8],
) -> Result<ParseOutcome, ProtocolError> {
    need(payload, 4)?;
    let declared = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);

    let expected = session.total_samples();
    if declared as u64 != expected {
        return Err(ProtocolError::SampleCountMismatch {
            declared,
            expected,
        });
    }

    let width = session.capture_mode().sample_width();
    let total = declared as usize;
    let sample_end = 4 + total * width;
    need(payload, sample_end)?;

    for channel in &mut session.capture_channels {
        channel.samples = Some(vec![0u8; total]);
    }

    for s in 0..total {
        let offset = 4 + s * width;
        let word = match width {
            1 => payload[offset] as u32,
            2 => u16::from_le_bytes([payload[offset], payload[offset + 1]]) as u32,
            _ => {
                // 32-bit word; the high byte is reserved.
                u32::from_le_bytes([
                    payload[offset],
                    payload[offset + 1],
                    payload[offset + 2],
                    payload[offset + 3],
                ]) & 0x00FF_FFFF
            }
        };
        for (k, channel) in session.capture_channels.iter_mut().enumerate() {
            if let Some(samples) = channel.samples.as_mut() {
                samples[s] = ((word >> k) & 1) as u8;
            }
        }
    }

    let mut offset = sample_end;
    let mut burst_count = 0usize;
    if session.measure_bursts {
        need(payload, offset + 2)?;
        burst_count = u16::from_le_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;

        need(payload, offset + burst_count * BURST_RECORD_SIZE)?;
        let mut bursts = Vec::with_capacity(burst_count);
        for _ in 0..burst_count {
            let r = &payload[offset..offset + BURST_RECORD_SIZE];
            bursts.push(BurstInfo {
                burst_sample_start: u32::from_le_bytes([r[0], r[1], r[2], r[3]]),
                burst_sample_end: u32::from_le_bytes([r[4], r[5], r[6], r[7]]),
                burst_sample_gap: u64::from_le_bytes([
                    r[8], r[9], r[10], r[11], r[12], r[13], r[14], r[15],
                ]),
                burst_time_gap: u64::from_le_bytes([
                    r[16], r[17], r[18], r[19], r[20], r[21], r[22], r[23],
                ]),
            });
            offset += BURST_RECORD_SIZE;
        }
        session.bursts = Some(bursts);
    } else {
        session.bursts = None;
    }

    if offset != payload.len() {
        return Err(ProtocolError::TrailingBytes(payload.len() - offset));
    }

    // The request already moved the pattern-trigger delay into the
    // pre-trigger window, so the device's detected trigger minus that delay
    // is by definition the pre-trigger boundary; nothing in the payload
    // feeds this.
    let trigger_index = session.pre_trigger_samples;

    debug!(
        "parsed capture payload: {} samples x {} channels, {} bursts, trigger at {}",
        total,
        session.capture_channels.len(),
        burst_count,
        trigger_index
    );

    Ok(ParseOutcome {
        total_samples: expected,
        trigger_index,
        burst_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AnalyzerChannel, TriggerType};

    fn session_with_channels(indices: &[u8]) -> CaptureSession {
        CaptureSession {
            frequency: 1_000_000,
            pre_trigger_samples: 2,
            post_trigger_samples: 2,
            capture_channels: indices.iter().map(|&i| AnalyzerChannel::new(i)).collect(),
            ..Default::default()
        }
    }

    fn payload_8ch(samples: &[u8]) -> Vec<u8> {
        let mut payload = (samples.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(samples);
        payload
    }

    #[test]
    fn test_parse_8_channel() {
        let mut session = session_with_channels(&[0, 1]);
        let outcome =
            parse_capture_payload(&mut session, &payload_8ch(&[0x01, 0x03, 0x02, 0x00])).unwrap();

        assert_eq!(outcome.total_samples, 4);
        assert_eq!(outcome.trigger_index, 2);
        assert_eq!(
            session.capture_channels[0].samples.as_deref(),
            Some(&[1, 1, 0, 0][..])
        );
        assert_eq!(
            session.capture_channels[1].samples.as_deref(),
            Some(&[0, 1, 1, 0][..])
        );
        assert!(session.bursts.is_none());
    }

    #[test]
    fn test_parse_16_channel_words() {
        // Channel at position 1 lives in the high byte of each u16 word.
        let mut session = session_with_channels(&[0, 9]);
        session.pre_trigger_samples = 1;
        session.post_trigger_samples = 1;
        let mut payload = 2u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&0x0002u16.to_le_bytes()); // pos 1 set
        payload.extend_from_slice(&0x0001u16.to_le_bytes()); // pos 0 set

        parse_capture_payload(&mut session, &payload).unwrap();
        assert_eq!(
            session.capture_channels[0].samples.as_deref(),
            Some(&[0, 1][..])
        );
        assert_eq!(
            session.capture_channels[1].samples.as_deref(),
            Some(&[1, 0][..])
        );
    }

    #[test]
    fn test_parse_24_channel_ignores_reserved_byte() {
        let mut session = session_with_channels(&[0, 23]);
        session.pre_trigger_samples = 1;
        session.post_trigger_samples = 1;
        let mut payload = 2u32.to_le_bytes().to_vec();
        // Reserved high byte set; only bit 1 (position 1) is real.
        payload.extend_from_slice(&0xFF00_0002u32.to_le_bytes());
        payload.extend_from_slice(&0x0000_0001u32.to_le_bytes());

        parse_capture_payload(&mut session, &payload).unwrap();
        assert_eq!(
            session.capture_channels[0].samples.as_deref(),
            Some(&[0, 1][..])
        );
        assert_eq!(
            session.capture_channels[1].samples.as_deref(),
            Some(&[1, 0][..])
        );
    }

    #[test]
    fn test_sample_count_mismatch() {
        let mut session = session_with_channels(&[0]);
        let err = parse_capture_payload(&mut session, &payload_8ch(&[0, 0, 0])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::SampleCountMismatch {
                declared: 3,
                expected: 4
            }
        );
    }

    #[test]
    fn test_truncated_payload() {
        let mut session = session_with_channels(&[0]);
        let mut payload = 4u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0, 1]);
        let err = parse_capture_payload(&mut session, &payload).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                expected: 8,
                actual: 6
            }
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut session = session_with_channels(&[0]);
        let mut payload = payload_8ch(&[0, 1, 0, 1]);
        payload.push(0xEE);
        assert_eq!(
            parse_capture_payload(&mut session, &payload).unwrap_err(),
            ProtocolError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_burst_tail() {
        let mut session = session_with_channels(&[0, 1]);
        session.measure_bursts = true;
        let mut payload = payload_8ch(&[0x01, 0x03, 0x02, 0x00]);
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes()); // start
        payload.extend_from_slice(&4u32.to_le_bytes()); // end
        payload.extend_from_slice(&0u64.to_le_bytes()); // sample gap
        payload.extend_from_slice(&1_000u64.to_le_bytes()); // 1 µs

        let outcome = parse_capture_payload(&mut session, &payload).unwrap();
        assert_eq!(outcome.burst_count, 1);
        let bursts = session.bursts.as_ref().unwrap();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].burst_sample_start, 0);
        assert_eq!(bursts[0].burst_sample_end, 4);
        assert_eq!(bursts[0].get_time(), "1.000 µs");
    }

    #[test]
    fn test_burst_tail_missing_is_truncated() {
        let mut session = session_with_channels(&[0]);
        session.measure_bursts = true;
        let err =
            parse_capture_payload(&mut session, &payload_8ch(&[0, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_samples_are_bits_and_full_length() {
        let mut session = session_with_channels(&[0, 1, 2]);
        session.pre_trigger_samples = 3;
        session.post_trigger_samples = 5;
        let raw: Vec<u8> = (0..8).map(|i| (i * 37) as u8).collect();
        parse_capture_payload(&mut session, &payload_8ch(&raw)).unwrap();

        for channel in &session.capture_channels {
            let samples = channel.samples.as_ref().unwrap();
            assert_eq!(samples.len() as u64, session.total_samples());
            assert!(samples.iter().all(|&b| b <= 1));
        }
    }

    #[test]
    fn test_trigger_realignment_for_complex() {
        let mut session = session_with_channels(&[0, 1]);
        session.trigger_type = TriggerType::Complex;
        session.trigger_bit_count = 2;
        session.pre_trigger_samples = 10;
        session.post_trigger_samples = 10;
        let raw = vec![0u8; 20];
        let outcome = parse_capture_payload(&mut session, &payload_8ch(&raw)).unwrap();
        assert_eq!(outcome.trigger_index, 10);
    }

    #[test]
    fn test_restartable_per_session() {
        let mut session = session_with_channels(&[0]);
        parse_capture_payload(&mut session, &payload_8ch(&[1, 1, 1, 1])).unwrap();
        parse_capture_payload(&mut session, &payload_8ch(&[0, 0, 0, 0])).unwrap();
        assert_eq!(
            session.capture_channels[0].samples.as_deref(),
            Some(&[0, 0, 0, 0][..])
        );
    }
}
