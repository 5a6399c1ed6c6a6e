//! Capture session model.
//!
//! A [`CaptureSession`] is the combined configuration and result of one
//! capture: the requested sample window, trigger setup, the ordered set of
//! [`AnalyzerChannel`]s, and after a burst-capable capture the recorded
//! [`BurstInfo`] timing. Sessions exclusively own their channels and channels
//! own their sample buffers; cloning never shares a buffer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest addressable channel index on a single device; the wire format
/// only knows 8/16/24-channel words. Multi-device composites stack member
/// channels above this.
pub const MAX_CHANNEL_INDEX: u8 = 23;

/// One digital input channel and, after a capture, its sample data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerChannel {
    /// Channel index; 0..=23 on a single device, higher on a composite.
    pub channel_number: u8,
    /// Human label; may be empty.
    pub channel_name: String,
    /// 24-bit RGB display color.
    pub channel_color: Option<u32>,
    /// Hidden in the caller's UI; still captured.
    pub hidden: bool,
    /// One byte per sample, each 0 or 1. Present only after a capture.
    pub samples: Option<Vec<u8>>,
}

impl AnalyzerChannel {
    pub fn new(channel_number: u8) -> Self {
        Self {
            channel_number,
            ..Default::default()
        }
    }

    /// Fallback label derived from the index: `"Channel 1"` for index 0.
    pub fn textual_channel_number(&self) -> String {
        format!("Channel {}", self.channel_number + 1)
    }
}

impl fmt::Display for AnalyzerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel_name.is_empty() {
            write!(f, "{}", self.textual_channel_number())
        } else {
            write!(f, "{}", self.channel_name)
        }
    }
}

/// One contiguous sub-capture inside a looped session, with the gap to the
/// previous burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstInfo {
    /// First sample index of the burst (inclusive).
    pub burst_sample_start: u32,
    /// One past the last sample index of the burst.
    pub burst_sample_end: u32,
    /// Samples elapsed since the previous burst; 0 for the first.
    pub burst_sample_gap: u64,
    /// Gap duration in nanoseconds.
    pub burst_time_gap: u64,
}

impl BurstInfo {
    /// Format the time gap with a unit scaled to its magnitude.
    ///
    /// Fixed-point, round-half-up at the unit boundaries: 999_999_999 ns is
    /// reported as `"1000.000 ms"`, not `"999.999 ms"`.
    pub fn get_time(&self) -> String {
        let ns = self.burst_time_gap;
        if ns < 1_000 {
            format!("{} ns", ns)
        } else if ns < 1_000_000 {
            format!("{}.{:03} µs", ns / 1_000, ns % 1_000)
        } else if ns < 1_000_000_000 {
            let thousandths = (ns + 500) / 1_000;
            format!("{}.{:03} ms", thousandths / 1_000, thousandths % 1_000)
        } else {
            let thousandths = (ns + 500_000) / 1_000_000;
            format!("{}.{:03} s", thousandths / 1_000, thousandths % 1_000)
        }
    }
}

impl fmt::Display for BurstInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Burst: {} to {}\nGap: {} ({} samples)",
            self.burst_sample_start,
            self.burst_sample_end,
            self.get_time(),
            self.burst_sample_gap
        )
    }
}

/// Device arming strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    /// Single-channel rising or falling edge.
    Edge,
    /// Wide pattern trigger, up to 16 bits.
    Complex,
    /// Small fast pattern trigger, up to 5 bits.
    Fast,
    /// Maximum-rate single shot, no pre-trigger window.
    Blast,
}

impl TriggerType {
    pub fn wire_value(&self) -> u8 {
        match self {
            TriggerType::Edge => 0,
            TriggerType::Complex => 1,
            TriggerType::Fast => 2,
            TriggerType::Blast => 3,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(TriggerType::Edge),
            1 => Some(TriggerType::Complex),
            2 => Some(TriggerType::Fast),
            3 => Some(TriggerType::Blast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Edge => "Edge",
            TriggerType::Complex => "Complex",
            TriggerType::Fast => "Fast",
            TriggerType::Blast => "Blast",
        }
    }
}

impl Default for TriggerType {
    fn default() -> Self {
        TriggerType::Edge
    }
}

/// Channel-width tier of a capture, fixing the per-sample wire width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CaptureMode {
    Channels8,
    Channels16,
    Channels24,
}

impl CaptureMode {
    /// Smallest mode admitting the highest active channel index.
    /// An empty channel set defaults to 8 channels.
    pub fn from_channels(channels: &[AnalyzerChannel]) -> Self {
        let max_index = channels.iter().map(|c| c.channel_number).max().unwrap_or(0);
        Self::from_max_index(max_index)
    }

    pub fn from_max_index(max_index: u8) -> Self {
        if max_index <= 7 {
            CaptureMode::Channels8
        } else if max_index <= 15 {
            CaptureMode::Channels16
        } else {
            CaptureMode::Channels24
        }
    }

    /// Device buffer divisor for this mode.
    pub fn divisor(&self) -> u32 {
        match self {
            CaptureMode::Channels8 => 1,
            CaptureMode::Channels16 => 2,
            CaptureMode::Channels24 => 4,
        }
    }

    /// Bytes per sample word on the wire.
    pub fn sample_width(&self) -> usize {
        match self {
            CaptureMode::Channels8 => 1,
            CaptureMode::Channels16 => 2,
            CaptureMode::Channels24 => 4,
        }
    }

    pub fn wire_value(&self) -> u8 {
        match self {
            CaptureMode::Channels8 => 0,
            CaptureMode::Channels16 => 1,
            CaptureMode::Channels24 => 2,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(CaptureMode::Channels8),
            1 => Some(CaptureMode::Channels16),
            2 => Some(CaptureMode::Channels24),
            _ => None,
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            CaptureMode::Channels8 => 8,
            CaptureMode::Channels16 => 16,
            CaptureMode::Channels24 => 24,
        }
    }
}

/// Pre/post sample bounds for one capture mode on one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureLimits {
    pub min_pre_samples: u32,
    pub max_pre_samples: u32,
    pub min_post_samples: u32,
    pub max_post_samples: u32,
}

impl CaptureLimits {
    /// Limits for `mode` on a device with `buffer_size` raw sample slots.
    ///
    /// The pre-trigger window is capped at 10% of the raw buffer regardless
    /// of mode; the post-trigger window gets the rest of the per-mode
    /// capacity.
    pub fn for_mode(buffer_size: u32, mode: CaptureMode) -> Self {
        let per_mode_capacity = buffer_size / mode.divisor();
        Self {
            min_pre_samples: 2,
            max_pre_samples: buffer_size / 10,
            min_post_samples: 2,
            max_post_samples: per_mode_capacity.saturating_sub(2),
        }
    }

    /// Limits for the mode implied by `channels`.
    pub fn for_channels(channels: &[AnalyzerChannel], buffer_size: u32) -> Self {
        Self::for_mode(buffer_size, CaptureMode::from_channels(channels))
    }

    pub fn max_total_samples(&self) -> u32 {
        self.min_pre_samples + self.max_post_samples
    }
}

/// Lowest sample rate reachable through the device's 16-bit clock divider,
/// which runs at twice the maximum rate.
pub fn min_frequency(max_frequency: u32) -> u32 {
    ((max_frequency as u64 * 2) / 65_535) as u32
}

/// Static capability record for one analyzer model.
///
/// Shared between driver construction and the compatibility database CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub max_frequency: u32,
    pub blast_frequency: u32,
    pub channels: u8,
    pub buffer_size: u32,
    pub mode_limits: [CaptureLimits; 3],
}

impl DeviceInfo {
    /// Build a record with `mode_limits` derived from the buffer size.
    pub fn new(
        name: impl Into<String>,
        max_frequency: u32,
        blast_frequency: u32,
        channels: u8,
        buffer_size: u32,
    ) -> Self {
        Self {
            name: name.into(),
            max_frequency,
            blast_frequency,
            channels,
            buffer_size,
            mode_limits: [
                CaptureLimits::for_mode(buffer_size, CaptureMode::Channels8),
                CaptureLimits::for_mode(buffer_size, CaptureMode::Channels16),
                CaptureLimits::for_mode(buffer_size, CaptureMode::Channels24),
            ],
        }
    }

    pub fn min_frequency(&self) -> u32 {
        min_frequency(self.max_frequency)
    }
}

/// Configuration and result of one capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSession {
    /// Sample rate in Hz.
    pub frequency: u32,
    pub pre_trigger_samples: u32,
    pub post_trigger_samples: u32,
    /// Extra post-trigger windows; 0 = single shot.
    pub loop_count: u8,
    pub trigger_type: TriggerType,
    /// Trigger channel index; first pattern channel for pattern modes.
    pub trigger_channel: u8,
    pub trigger_inverted: bool,
    /// Pattern word for Fast/Complex triggers.
    pub trigger_pattern: u16,
    /// Pattern width in bits.
    pub trigger_bit_count: u8,
    /// Record burst timing between loop windows.
    pub measure_bursts: bool,
    /// Ordered set of captured channels.
    pub capture_channels: Vec<AnalyzerChannel>,
    /// Burst records; present only after a burst-capable capture completes.
    pub bursts: Option<Vec<BurstInfo>>,
}

impl CaptureSession {
    /// Total samples the device returns for this configuration.
    pub fn total_samples(&self) -> u64 {
        self.pre_trigger_samples as u64
            + self.post_trigger_samples as u64 * (self.loop_count as u64 + 1)
    }

    /// Channel-width tier implied by the active channel set.
    pub fn capture_mode(&self) -> CaptureMode {
        CaptureMode::from_channels(&self.capture_channels)
    }

    /// Copy of the configuration without any captured data: channels are
    /// cloned with their `samples` dropped, and `bursts` is cleared.
    pub fn clone_settings(&self) -> Self {
        let mut copy = self.clone();
        for channel in &mut copy.capture_channels {
            channel.samples = None;
        }
        copy.bursts = None;
        copy
    }
}
