//! Versioned `.lac` session files.
//!
//! # Container layout
//!
//! ```text
//! ┌───────────┬─────────┬───────┬─────────────────────┬───────────┬─────────┐
//! │ "LAC\0"   │ version │ flags │ header              │ body      │ crc32   │
//! │ 4 bytes   │ u16le   │ u16le │ u32le len + JSON    │ blocks    │ u32le   │
//! └───────────┴─────────┴───────┴─────────────────────┴───────────┴─────────┘
//! ```
//!
//! The JSON header describes the device, session parameters, channel
//! metadata and burst records. The body holds one block per channel that has
//! sample data: `channel_index u8, algo u8, orig_size u32le, comp_size
//! u32le, payload`. The CRC covers everything after the flags word, through
//! the end of the body.
//!
//! Codec failures stay with the file operation; they never touch a live
//! capture.

pub mod compress;

use std::io::{self, Read, Write};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{AnalyzerChannel, BurstInfo, CaptureSession, DeviceInfo, TriggerType};
use compress::{compress_adaptive, decompress, CompressionAlgo};

/// File magic.
pub const MAGIC: [u8; 4] = *b"LAC\0";
/// Current format version (1.0).
pub const VERSION: u16 = 0x0100;
/// Versions this reader accepts.
pub const SUPPORTED_VERSIONS: &[u16] = &[0x0100];

/// File-format and compression failures.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("not a .lac file (bad magic {0:02X?})")]
    BadMagic([u8; 4]),
    #[error("unsupported file version 0x{0:04X}")]
    UnsupportedVersion(u16),
    #[error("unknown flags 0x{0:04X}")]
    UnknownFlags(u16),
    #[error("file truncated")]
    Truncated,
    #[error("crc mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("unknown compression algorithm {0}")]
    UnknownAlgorithm(u8),
    #[error("block for channel {0} has no matching channel entry")]
    UnknownChannel(u8),
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("header error: {0}")]
    Header(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct LacChannelMeta {
    number: u8,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    color: Option<u32>,
    #[serde(default)]
    hidden: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LacHeader {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    device: Option<DeviceInfo>,
    frequency: u32,
    pre_trigger_samples: u32,
    post_trigger_samples: u32,
    loop_count: u8,
    trigger_type: TriggerType,
    trigger_channel: u8,
    trigger_inverted: bool,
    trigger_pattern: u16,
    trigger_bit_count: u8,
    measure_bursts: bool,
    channels: Vec<LacChannelMeta>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    bursts: Option<Vec<BurstInfo>>,
}

/// A session restored from a `.lac` file.
#[derive(Debug)]
pub struct LoadedSession {
    pub session: CaptureSession,
    pub device: Option<DeviceInfo>,
}

/// Write a session (and optional device record) as a `.lac` file.
///
/// Each channel with sample data gets its own adaptively compressed block.
pub fn save_session(
    writer: &mut impl Write,
    session: &CaptureSession,
    device: Option<&DeviceInfo>,
) -> Result<(), CodecError> {
    let header = LacHeader {
        device: device.cloned(),
        frequency: session.frequency,
        pre_trigger_samples: session.pre_trigger_samples,
        post_trigger_samples: session.post_trigger_samples,
        loop_count: session.loop_count,
        trigger_type: session.trigger_type,
        trigger_channel: session.trigger_channel,
        trigger_inverted: session.trigger_inverted,
        trigger_pattern: session.trigger_pattern,
        trigger_bit_count: session.trigger_bit_count,
        measure_bursts: session.measure_bursts,
        channels: session
            .capture_channels
            .iter()
            .map(|c| LacChannelMeta {
                number: c.channel_number,
                name: c.channel_name.clone(),
                color: c.channel_color,
                hidden: c.hidden,
            })
            .collect(),
        bursts: session.bursts.clone(),
    };
    let header_json = serde_json::to_vec(&header)?;

    // Everything the CRC covers, assembled up front.
    let mut covered = Vec::with_capacity(header_json.len() + 64);
    covered.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
    covered.extend_from_slice(&header_json);

    for channel in &session.capture_channels {
        let samples = match &channel.samples {
            Some(samples) => samples,
            None => continue,
        };
        let (algo, payload) = compress_adaptive(samples);
        covered.push(channel.channel_number);
        covered.push(algo.wire_value());
        covered.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        covered.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        covered.extend_from_slice(&payload);
        debug!(
            "channel {}: {} samples -> {} bytes ({:?})",
            channel.channel_number,
            samples.len(),
            payload.len(),
            algo
        );
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&covered);
    let crc = hasher.finalize();

    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&0u16.to_le_bytes())?;
    writer.write_all(&covered)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read a `.lac` file back into a session.
pub fn load_session(reader: &mut impl Read) -> Result<LoadedSession, CodecError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    if data.len() < 12 {
        return Err(CodecError::Truncated);
    }
    let magic = [data[0], data[1], data[2], data[3]];
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let flags = u16::from_le_bytes([data[6], data[7]]);
    if flags != 0 {
        return Err(CodecError::UnknownFlags(flags));
    }

    let covered = &data[8..data.len() - 4];
    let stored = u32::from_le_bytes([
        data[data.len() - 4],
        data[data.len() - 3],
        data[data.len() - 2],
        data[data.len() - 1],
    ]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(covered);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(CodecError::CrcMismatch { stored, computed });
    }

    if covered.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let header_len = u32::from_le_bytes([covered[0], covered[1], covered[2], covered[3]]) as usize;
    if covered.len() < 4 + header_len {
        return Err(CodecError::Truncated);
    }
    let header: LacHeader = serde_json::from_slice(&covered[4..4 + header_len])?;

    let mut session = CaptureSession {
        frequency: header.frequency,
        pre_trigger_samples: header.pre_trigger_samples,
        post_trigger_samples: header.post_trigger_samples,
        loop_count: header.loop_count,
        trigger_type: header.trigger_type,
        trigger_channel: header.trigger_channel,
        trigger_inverted: header.trigger_inverted,
        trigger_pattern: header.trigger_pattern,
        trigger_bit_count: header.trigger_bit_count,
        measure_bursts: header.measure_bursts,
        capture_channels: header
            .channels
            .iter()
            .map(|meta| AnalyzerChannel {
                channel_number: meta.number,
                channel_name: meta.name.clone(),
                channel_color: meta.color,
                hidden: meta.hidden,
                samples: None,
            })
            .collect(),
        bursts: header.bursts,
    };

    let mut offset = 4 + header_len;
    while offset < covered.len() {
        if covered.len() - offset < 10 {
            return Err(CodecError::Truncated);
        }
        let channel_index = covered[offset];
        let algo_id = covered[offset + 1];
        let orig_size = u32::from_le_bytes([
            covered[offset + 2],
            covered[offset + 3],
            covered[offset + 4],
            covered[offset + 5],
        ]) as usize;
        let comp_size = u32::from_le_bytes([
            covered[offset + 6],
            covered[offset + 7],
            covered[offset + 8],
            covered[offset + 9],
        ]) as usize;
        offset += 10;

        if covered.len() - offset < comp_size {
            return Err(CodecError::Truncated);
        }
        let algo = CompressionAlgo::from_wire(algo_id)
            .ok_or(CodecError::UnknownAlgorithm(algo_id))?;
        let samples = decompress(algo, &covered[offset..offset + comp_size], orig_size)?;
        offset += comp_size;

        let channel = session
            .capture_channels
            .iter_mut()
            .find(|c| c.channel_number == channel_index)
            .ok_or(CodecError::UnknownChannel(channel_index))?;
        channel.samples = Some(samples);
    }

    Ok(LoadedSession {
        session,
        device: header.device,
    })
}
