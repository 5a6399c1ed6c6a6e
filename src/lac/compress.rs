//! Channel data compression.
//!
//! Three schemes, selectable per channel block. Run lengths are unsigned
//! LEB128 varints throughout.
//!
//! - `none` - passthrough.
//! - `rle`  - repeated `(run_length varint, value byte)` pairs; works on any
//!   byte stream.
//! - `delta` - one initial-value byte, then varint run lengths between
//!   transitions with the value toggling after each run. Only applicable to
//!   0/1 streams, where dense logic traces make it the usual winner.

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::CodecError;

/// Per-block compression scheme identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgo {
    None,
    Rle,
    Delta,
}

impl CompressionAlgo {
    pub fn wire_value(&self) -> u8 {
        match self {
            CompressionAlgo::None => 0,
            CompressionAlgo::Rle => 1,
            CompressionAlgo::Delta => 2,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionAlgo::None),
            1 => Some(CompressionAlgo::Rle),
            2 => Some(CompressionAlgo::Delta),
            _ => None,
        }
    }
}

lazy_static! {
    /// Registered algorithms by wire id.
    static ref ALGORITHM_REGISTRY: HashMap<u8, (&'static str, CompressionAlgo)> = {
        let mut registry = HashMap::new();
        registry.insert(0, ("none", CompressionAlgo::None));
        registry.insert(1, ("rle", CompressionAlgo::Rle));
        registry.insert(2, ("delta", CompressionAlgo::Delta));
        registry
    };
}

/// Registry name for an algorithm id, if registered.
pub fn algorithm_name(id: u8) -> Option<&'static str> {
    ALGORITHM_REGISTRY.get(&id).map(|(name, _)| *name)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8], offset: &mut usize) -> Result<u64, CodecError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*offset)
            .ok_or(CodecError::Corrupt("truncated varint"))?;
        *offset += 1;
        if shift >= 64 {
            return Err(CodecError::Corrupt("varint overflow"));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn compress_rle(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let value = data[i];
        let mut run = 1u64;
        while i + (run as usize) < data.len() && data[i + run as usize] == value {
            run += 1;
        }
        write_varint(&mut out, run);
        out.push(value);
        i += run as usize;
    }
    out
}

fn decompress_rle(data: &[u8], orig_size: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(orig_size);
    let mut offset = 0;
    while offset < data.len() {
        let run = read_varint(data, &mut offset)? as usize;
        let value = *data
            .get(offset)
            .ok_or(CodecError::Corrupt("rle pair missing value byte"))?;
        offset += 1;
        if out.len() + run > orig_size {
            return Err(CodecError::Corrupt("rle output exceeds declared size"));
        }
        out.resize(out.len() + run, value);
    }
    if out.len() != orig_size {
        return Err(CodecError::SizeMismatch {
            expected: orig_size,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn compress_delta(data: &[u8]) -> Option<Vec<u8>> {
    if data.iter().any(|&b| b > 1) {
        return None;
    }
    if data.is_empty() {
        return Some(Vec::new());
    }

    let mut out = vec![data[0]];
    let mut current = data[0];
    let mut run = 0u64;
    for &byte in data {
        if byte == current {
            run += 1;
        } else {
            write_varint(&mut out, run);
            current = byte;
            run = 1;
        }
    }
    write_varint(&mut out, run);
    Some(out)
}

fn decompress_delta(data: &[u8], orig_size: usize) -> Result<Vec<u8>, CodecError> {
    if orig_size == 0 {
        return if data.is_empty() {
            Ok(Vec::new())
        } else {
            Err(CodecError::Corrupt("delta stream for empty block"))
        };
    }

    let mut value = *data
        .first()
        .ok_or(CodecError::Corrupt("delta stream missing start value"))?;
    if value > 1 {
        return Err(CodecError::Corrupt("delta start value is not a bit"));
    }

    let mut out = Vec::with_capacity(orig_size);
    let mut offset = 1;
    while out.len() < orig_size {
        let run = read_varint(data, &mut offset)? as usize;
        if out.len() + run > orig_size {
            return Err(CodecError::Corrupt("delta output exceeds declared size"));
        }
        out.resize(out.len() + run, value);
        value ^= 1;
    }
    if offset != data.len() {
        return Err(CodecError::Corrupt("trailing bytes in delta stream"));
    }
    Ok(out)
}

/// Compress with an explicit algorithm.
///
/// `delta` rejects inputs that are not pure 0/1 streams.
pub fn compress(algo: CompressionAlgo, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match algo {
        CompressionAlgo::None => Ok(data.to_vec()),
        CompressionAlgo::Rle => Ok(compress_rle(data)),
        CompressionAlgo::Delta => {
            compress_delta(data).ok_or(CodecError::Corrupt("delta input is not a bit stream"))
        }
    }
}

/// Strict inverse of [`compress`]; the output always has `orig_size` bytes.
pub fn decompress(
    algo: CompressionAlgo,
    data: &[u8],
    orig_size: usize,
) -> Result<Vec<u8>, CodecError> {
    match algo {
        CompressionAlgo::None => {
            if data.len() != orig_size {
                return Err(CodecError::SizeMismatch {
                    expected: orig_size,
                    actual: data.len(),
                });
            }
            Ok(data.to_vec())
        }
        CompressionAlgo::Rle => decompress_rle(data, orig_size),
        CompressionAlgo::Delta => decompress_delta(data, orig_size),
    }
}

/// Pick the algorithm with the smallest output for this block.
///
/// Ties go to `rle`; `delta` only competes on pure bit streams.
pub fn compress_adaptive(data: &[u8]) -> (CompressionAlgo, Vec<u8>) {
    let mut best = (CompressionAlgo::Rle, compress_rle(data));

    if let Some(delta) = compress_delta(data) {
        if delta.len() < best.1.len() {
            best = (CompressionAlgo::Delta, delta);
        }
    }
    if data.len() < best.1.len() {
        best = (CompressionAlgo::None, data.to_vec());
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(algo: CompressionAlgo, data: &[u8]) {
        let compressed = compress(algo, data).unwrap();
        let restored = decompress(algo, &compressed, data.len()).unwrap();
        assert_eq!(restored, data, "{:?} round trip", algo);
    }

    // Deterministic pseudo-random bits without a rand dependency.
    fn lcg_bits(count: usize, mut seed: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            out.push(((seed >> 33) & 1) as u8);
        }
        out
    }

    #[test]
    fn test_varint_boundaries() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut offset = 0;
            assert_eq!(read_varint(&buf, &mut offset).unwrap(), value);
            assert_eq!(offset, buf.len());
        }
    }

    #[test]
    fn test_round_trips() {
        let bits = lcg_bits(1_000, 7);
        for algo in [CompressionAlgo::None, CompressionAlgo::Rle, CompressionAlgo::Delta] {
            round_trip(algo, &bits);
            round_trip(algo, &[]);
            round_trip(algo, &[0]);
            round_trip(algo, &[1; 300]);
        }
        // Arbitrary bytes for the general-purpose schemes.
        let bytes: Vec<u8> = (0..=255).chain(std::iter::repeat(9).take(500)).collect();
        round_trip(CompressionAlgo::None, &bytes);
        round_trip(CompressionAlgo::Rle, &bytes);
    }

    #[test]
    fn test_delta_rejects_non_bits() {
        assert!(compress(CompressionAlgo::Delta, &[0, 1, 2]).is_err());
    }

    #[test]
    fn test_rle_encoding_shape() {
        // 5x0, 3x1 -> (5,0)(3,1)
        let compressed = compress(CompressionAlgo::Rle, &[0, 0, 0, 0, 0, 1, 1, 1]).unwrap();
        assert_eq!(compressed, vec![5, 0, 3, 1]);
    }

    #[test]
    fn test_delta_encoding_shape() {
        // start 0, runs 5,3
        let compressed = compress(CompressionAlgo::Delta, &[0, 0, 0, 0, 0, 1, 1, 1]).unwrap();
        assert_eq!(compressed, vec![0, 5, 3]);
    }

    #[test]
    fn test_adaptive_prefers_delta_on_long_runs() {
        let mut data = vec![0u8; 600];
        data.extend(vec![1u8; 400]);
        let (algo, compressed) = compress_adaptive(&data);
        assert_eq!(algo, CompressionAlgo::Delta);
        assert_eq!(
            decompress(algo, &compressed, data.len()).unwrap(),
            data
        );
    }

    #[test]
    fn test_adaptive_tie_goes_to_rle() {
        // One run: rle = (varint,value) = 2 bytes, delta = start + varint = 2 bytes.
        let data = vec![1u8; 100];
        let (algo, _) = compress_adaptive(&data);
        assert_eq!(algo, CompressionAlgo::Rle);
    }

    #[test]
    fn test_adaptive_falls_back_to_none() {
        // Alternating bits: rle needs 2 bytes per sample, delta ~1, none = len.
        // Use non-bit alternation so delta is out and rle inflates.
        let data: Vec<u8> = (0..64).map(|i| (i % 7) as u8 + 2).collect();
        let (algo, compressed) = compress_adaptive(&data);
        assert_eq!(algo, CompressionAlgo::None);
        assert_eq!(compressed, data);
    }

    #[test]
    fn test_adaptive_random_bitstream_round_trip() {
        let data = lcg_bits(10_000, 42);
        let (algo, compressed) = compress_adaptive(&data);
        let restored = decompress(algo, &compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_decompress_size_mismatch() {
        let compressed = compress(CompressionAlgo::Rle, &[1, 1, 1]).unwrap();
        assert!(matches!(
            decompress(CompressionAlgo::Rle, &compressed, 5).unwrap_err(),
            CodecError::SizeMismatch { expected: 5, actual: 3 }
        ));
        assert!(decompress(CompressionAlgo::None, &[1, 2], 3).is_err());
    }
}
