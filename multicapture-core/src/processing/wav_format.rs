//! WAV header generation for streamed recordings.
//!
//! Files are opened with a placeholder header whose size fields hold
//! [`UNKNOWN_SIZE`], then rewritten once the final length is known.

use crate::models::audio_models::AudioFormat;
use crate::models::config::{CHANNELS, SAMPLE_RATE};

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Size field value written while the final length is unknown.
pub const UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;

/// Generate a 44-byte WAV header for a mono 44.1 kHz stream.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file_size (total bytes - 8)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16
/// [20-21]  format code (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bits / 8
/// [32-33]  block_align = channels * bits / 8
/// [34-35]  bits per sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(
    format: AudioFormat,
    file_size: u32,
    data_size: u32,
) -> [u8; WAV_HEADER_SIZE] {
    let bits = format.bits_per_sample();
    let byte_rate = SAMPLE_RATE * CHANNELS as u32 * bits as u32 / 8;
    let block_align = CHANNELS * bits / 8;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&file_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format.wav_format_code().to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Header written at open time, before any payload exists.
pub fn placeholder_header(format: AudioFormat) -> [u8; WAV_HEADER_SIZE] {
    generate_wav_header(format, UNKNOWN_SIZE, UNKNOWN_SIZE)
}

/// Header for a finished file of `file_len` total bytes.
///
/// Sizes saturate at `u32::MAX` for files beyond the RIFF limit.
pub fn final_header(format: AudioFormat, file_len: u64) -> [u8; WAV_HEADER_SIZE] {
    let data_size = file_len.saturating_sub(WAV_HEADER_SIZE as u64);
    let file_size = file_len.saturating_sub(8);
    generate_wav_header(
        format,
        u32::try_from(file_size).unwrap_or(u32::MAX),
        u32::try_from(data_size).unwrap_or(u32::MAX),
    )
}

/// Fields of a parsed 44-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeaderFields {
    pub file_size: u32,
    pub format_code: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

/// Parse a canonical 44-byte header. Returns `None` if the magic is wrong.
pub fn parse_wav_header(bytes: &[u8]) -> Option<WavHeaderFields> {
    if bytes.len() < WAV_HEADER_SIZE
        || &bytes[0..4] != b"RIFF"
        || &bytes[8..12] != b"WAVE"
        || &bytes[12..16] != b"fmt "
        || &bytes[36..40] != b"data"
    {
        return None;
    }
    let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let u32_at =
        |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    Some(WavHeaderFields {
        file_size: u32_at(4),
        format_code: u16_at(20),
        channels: u16_at(22),
        sample_rate: u32_at(24),
        byte_rate: u32_at(28),
        block_align: u16_at(32),
        bits_per_sample: u16_at(34),
        data_size: u32_at(40),
    })
}
