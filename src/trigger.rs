//! Trigger mode validation and request composition.
//!
//! Four arming strategies with different constraints and detection latency:
//! Edge is single-channel and latency-free, Fast and Complex are pattern
//! triggers that detect a fixed number of samples late, Blast runs at the
//! device's blast rate with no pre-trigger window at all.
//!
//! Pattern detection latency is compensated at request time by moving the
//! delay from the post- to the pre-trigger window, so the total sample count
//! is unchanged and the device's detected trigger lands `delay` samples past
//! the caller's pre-trigger boundary.

use thiserror::Error;

use crate::protocol::request::CaptureRequest;
use crate::session::{CaptureLimits, CaptureSession, DeviceInfo, TriggerType};

/// Post-trigger detection latency of the fast pattern unit, in samples.
pub const FAST_TRIGGER_DELAY: u32 = 3;
/// Post-trigger detection latency of the complex pattern unit, in samples.
pub const COMPLEX_TRIGGER_DELAY: u32 = 5;

/// Widest pattern the fast trigger unit accepts.
pub const MAX_FAST_BITS: u8 = 5;
/// Widest pattern the complex trigger unit accepts.
pub const MAX_COMPLEX_BITS: u8 = 16;

/// Trigger settings rejected before any wire activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no capture channels selected")]
    NoChannels,
    #[error("channel {0} exceeds device channel count {1}")]
    ChannelOutOfRange(u8, u8),
    #[error("trigger channel {0} exceeds device channel count {1}")]
    TriggerChannelOutOfRange(u8, u8),
    #[error("trigger channel {0} is not part of the capture")]
    TriggerChannelNotCaptured(u8),
    #[error("{mode} trigger pattern width {bits} outside 1..={max}")]
    InvalidPatternWidth { mode: &'static str, bits: u8, max: u8 },
    #[error("pattern window {0}+{1} exceeds the 16 pattern channels")]
    PatternWindowOutOfRange(u8, u8),
    #[error("pre-trigger samples {value} outside {min}..={max}")]
    PreSamplesOutOfRange { value: u32, min: u32, max: u32 },
    #[error("post-trigger samples {value} outside {min}..={max}")]
    PostSamplesOutOfRange { value: u32, min: u32, max: u32 },
    #[error("post-trigger samples {post} below trigger delay {delay} + minimum {min}")]
    InsufficientPostForDelay { post: u32, delay: u32, min: u32 },
    #[error("frequency {value} outside device range {min}..={max}")]
    FrequencyOutOfRange { value: u32, min: u32, max: u32 },
    #[error("blast capture requires zero pre-trigger samples, got {0}")]
    BlastPreTrigger(u32),
    #[error("blast post-trigger samples {0} exceed per-mode capacity {1}")]
    BlastPostExceedsCapacity(u32, u32),
    #[error("device has no blast frequency")]
    BlastUnsupported,
    #[error("burst measurement cannot be combined with blast capture")]
    BurstsWithBlast,
    #[error("loop capture requires an edge trigger")]
    LoopRequiresEdge,
}

/// Samples the device detects a trigger late in the given mode.
pub fn trigger_delay_offset(session: &CaptureSession) -> u32 {
    match session.trigger_type {
        TriggerType::Edge | TriggerType::Blast => 0,
        TriggerType::Fast => FAST_TRIGGER_DELAY,
        TriggerType::Complex => COMPLEX_TRIGGER_DELAY,
    }
}

/// Check a session's trigger and window settings against device limits.
///
/// Passing here guarantees [`compose_trigger_request`] produces a request the
/// device will accept; failure maps to `CaptureError::BadParams` with no
/// state change.
pub fn validate_trigger_settings(
    session: &CaptureSession,
    limits: &CaptureLimits,
    device: &DeviceInfo,
) -> Result<(), ValidationError> {
    if session.capture_channels.is_empty() {
        return Err(ValidationError::NoChannels);
    }
    for channel in &session.capture_channels {
        if channel.channel_number >= device.channels {
            return Err(ValidationError::ChannelOutOfRange(
                channel.channel_number,
                device.channels,
            ));
        }
    }
    if session.trigger_channel >= device.channels {
        return Err(ValidationError::TriggerChannelOutOfRange(
            session.trigger_channel,
            device.channels,
        ));
    }

    if session.loop_count > 0 && session.trigger_type != TriggerType::Edge {
        return Err(ValidationError::LoopRequiresEdge);
    }

    match session.trigger_type {
        TriggerType::Fast => {
            validate_pattern_width("fast", session.trigger_bit_count, MAX_FAST_BITS)?;
            validate_pattern_window(session)?;
        }
        TriggerType::Complex => {
            validate_pattern_width("complex", session.trigger_bit_count, MAX_COMPLEX_BITS)?;
            validate_pattern_window(session)?;
        }
        TriggerType::Edge => {}
        TriggerType::Blast => {
            if device.blast_frequency == 0 {
                return Err(ValidationError::BlastUnsupported);
            }
            if session.measure_bursts {
                return Err(ValidationError::BurstsWithBlast);
            }
        }
    }

    if session.trigger_type == TriggerType::Blast {
        return validate_blast_window(session, device);
    }

    // The trigger source must be one of the captured channels.
    if !session
        .capture_channels
        .iter()
        .any(|c| c.channel_number == session.trigger_channel)
    {
        return Err(ValidationError::TriggerChannelNotCaptured(
            session.trigger_channel,
        ));
    }

    let min_freq = device.min_frequency();
    if session.frequency < min_freq || session.frequency > device.max_frequency {
        return Err(ValidationError::FrequencyOutOfRange {
            value: session.frequency,
            min: min_freq,
            max: device.max_frequency,
        });
    }

    let delay = trigger_delay_offset(session);

    // The wire request carries pre + delay, which must still fit the device.
    let pre = session.pre_trigger_samples;
    if pre < limits.min_pre_samples || pre + delay > limits.max_pre_samples {
        return Err(ValidationError::PreSamplesOutOfRange {
            value: pre,
            min: limits.min_pre_samples,
            max: limits.max_pre_samples.saturating_sub(delay),
        });
    }

    let post = session.post_trigger_samples;
    if post < delay + limits.min_post_samples {
        return Err(ValidationError::InsufficientPostForDelay {
            post,
            delay,
            min: limits.min_post_samples,
        });
    }
    if post - delay > limits.max_post_samples {
        return Err(ValidationError::PostSamplesOutOfRange {
            value: post,
            min: delay + limits.min_post_samples,
            max: limits.max_post_samples + delay,
        });
    }

    Ok(())
}

fn validate_pattern_width(
    mode: &'static str,
    bits: u8,
    max: u8,
) -> Result<(), ValidationError> {
    if bits == 0 || bits > max {
        return Err(ValidationError::InvalidPatternWidth { mode, bits, max });
    }
    Ok(())
}

fn validate_pattern_window(session: &CaptureSession) -> Result<(), ValidationError> {
    // trigger_value is a 16-bit word, so patterns live on channels 0..16.
    if session.trigger_channel as u16 + session.trigger_bit_count as u16 > 16 {
        return Err(ValidationError::PatternWindowOutOfRange(
            session.trigger_channel,
            session.trigger_bit_count,
        ));
    }
    Ok(())
}

fn validate_blast_window(
    session: &CaptureSession,
    device: &DeviceInfo,
) -> Result<(), ValidationError> {
    if session.pre_trigger_samples != 0 {
        return Err(ValidationError::BlastPreTrigger(session.pre_trigger_samples));
    }
    let capacity = device.buffer_size / session.capture_mode().divisor();
    if session.post_trigger_samples > capacity {
        return Err(ValidationError::BlastPostExceedsCapacity(
            session.post_trigger_samples,
            capacity,
        ));
    }
    if session.frequency > device.blast_frequency {
        return Err(ValidationError::FrequencyOutOfRange {
            value: session.frequency,
            min: device.min_frequency(),
            max: device.blast_frequency,
        });
    }
    Ok(())
}

/// Build the trigger-owned part of the wire request.
///
/// Fills trigger type, channel, inversion/bit-count, pattern word, the
/// delay-shifted sample window and the capture mode; the request assembler
/// fills the channel map, frequency and loop fields.
pub fn compose_trigger_request(session: &CaptureSession) -> CaptureRequest {
    let delay = trigger_delay_offset(session);
    let pattern_mode = matches!(
        session.trigger_type,
        TriggerType::Fast | TriggerType::Complex
    );

    CaptureRequest {
        trigger_type: session.trigger_type.wire_value(),
        trigger: session.trigger_channel,
        inverted_or_count: if pattern_mode {
            session.trigger_bit_count
        } else {
            session.trigger_inverted as u8
        },
        trigger_value: if pattern_mode { session.trigger_pattern } else { 0 },
        pre_samples: session.pre_trigger_samples + delay,
        post_samples: session.post_trigger_samples - delay,
        capture_mode: session.capture_mode().wire_value(),
        ..Default::default()
    }
}
