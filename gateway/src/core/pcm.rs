//! Linear PCM16 LE mono conversions shared by capture and playback.

use bytes::{BufMut, Bytes, BytesMut};

use super::protocol::{ProtocolError, ProtocolResult};

/// Microphone → relay → upstream sample rate.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Upstream → relay → speaker sample rate.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Scale factor for converting i16 PCM samples to f32 in [-1.0, 1.0)
const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Clamp a float sample to [-1.0, 1.0] and scale it to i16.
///
/// Negative values scale by 32768 and positive values by 32767 so that both
/// ends of the range map exactly onto `i16::MIN` and `i16::MAX`.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * i16::MAX as f32) as i16
    }
}

/// Encode float samples as PCM16 little-endian bytes.
pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.put_i16_le(sample_to_i16(sample));
    }
    buf.freeze()
}

/// Decode PCM16 little-endian bytes into normalized float samples.
pub fn decode_pcm16(pcm: &[u8]) -> ProtocolResult<Vec<f32>> {
    if pcm.len() % 2 != 0 {
        return Err(ProtocolError::OddPcmLength(pcm.len()));
    }
    Ok(pcm
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * PCM_TO_FLOAT_SCALE)
        .collect())
}

/// Playback duration in seconds of `samples` mono samples at `sample_rate`.
pub fn duration_secs(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64
}
