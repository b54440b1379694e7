//! 16-bit PCM conversion and the byte/base64 forms used on the wire.
//!
//! Wire PCM is mono, signed 16-bit little-endian at 24 kHz. Nothing here
//! checks the rate or channel count; both are fixed by convention.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::EnvelopeError;

/// Sample rate shared by capture, playback and the remote agent.
pub const SAMPLE_RATE: u32 = 24000;

/// Samples per capture callback.
pub const BLOCK_SIZE: usize = 4096;

/// Quantize one float sample. Out-of-range input is clamped first, then
/// negatives scale by 32768 and the rest by 32767, truncating toward zero.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert a float block to 16-bit PCM.
pub fn float_to_pcm16(input: &[f32]) -> Vec<i16> {
    input.iter().copied().map(sample_to_i16).collect()
}

/// Join captured blocks into one contiguous buffer, keeping block order.
pub fn concat_blocks(blocks: &[Vec<i16>]) -> Vec<i16> {
    let total: usize = blocks.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for block in blocks {
        out.extend_from_slice(block);
    }
    out
}

pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_pcm(bytes: &[u8]) -> Result<Vec<i16>, EnvelopeError> {
    if bytes.len() % 2 != 0 {
        return Err(EnvelopeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn encode_base64(samples: &[i16]) -> String {
    STANDARD.encode(pcm_to_bytes(samples))
}

/// Decode an `audio/pcm` payload. Some agents put a whole WAV file in the
/// field, so a RIFF header is skipped when one is present.
pub fn decode_base64(data: &str) -> Result<Vec<i16>, EnvelopeError> {
    let bytes = STANDARD.decode(data.trim())?;
    bytes_to_pcm(strip_wav_header(&bytes))
}

/// Return the `data` chunk of a RIFF/WAVE buffer, or the input unchanged
/// when it is not one. A WAVE file without a `data` chunk yields nothing.
pub fn strip_wav_header(bytes: &[u8]) -> &[u8] {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return bytes;
    }

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body = offset + 8;
        if id == b"data" {
            let end = body.saturating_add(size).min(bytes.len());
            return &bytes[body..end];
        }
        // chunks are word aligned
        offset = body.saturating_add(size).saturating_add(size & 1);
    }
    &[]
}
