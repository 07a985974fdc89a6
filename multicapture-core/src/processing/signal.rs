//! Pure sample math shared by the real-time callback and the writer.
//!
//! Everything here works on `&[f32]` buffers in `[-1.0, 1.0]` and allocates
//! only into caller-provided vectors.

use crate::models::audio_models::AudioFormat;
use crate::models::config::WAVEFORM_POINTS;
use crate::traits::audio_backend::InputBuffer;

const INT16_SCALE: f32 = 32768.0;

/// Meter and waveform values are shown at twice their amplitude.
const DISPLAY_SCALE: f32 = 2.0;

/// Decode a native buffer into normalized floats, replacing `out`'s contents.
pub fn decode_into(input: InputBuffer<'_>, out: &mut Vec<f32>) {
    out.clear();
    match input {
        InputBuffer::Int16(samples) => out.extend(samples.iter().map(|&s| s as f32 / INT16_SCALE)),
        InputBuffer::Float32(samples) => out.extend_from_slice(samples),
    }
}

/// Multiply by `gain`, then sanitize: NaN → 0, ±Inf → ±1, clamp to `[-1, 1]`.
///
/// The order matters: clamping first would let a NaN product through.
#[inline]
pub fn apply_gain(sample: f32, gain: f32) -> f32 {
    let gained = sample * gain;
    let finite = if gained.is_nan() {
        0.0
    } else if gained.is_infinite() {
        gained.signum()
    } else {
        gained
    };
    finite.clamp(-1.0, 1.0)
}

pub fn apply_gain_in_place(samples: &mut [f32], gain: f32) {
    for sample in samples.iter_mut() {
        *sample = apply_gain(*sample, gain);
    }
}

/// Root mean square of `samples` (0.0 for an empty slice).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// RMS scaled for the level meter, capped at 1.0.
pub fn display_rms(samples: &[f32]) -> f32 {
    (rms_level(samples) * DISPLAY_SCALE).min(1.0)
}

/// Peak absolute level of `samples`.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Decimate for waveform display: every `max(1, len / 100)`-th sample,
/// at most [`WAVEFORM_POINTS`] points, each doubled and clamped.
pub fn downsample_waveform(samples: &[f32], out: &mut Vec<f32>) {
    out.clear();
    let stride = (samples.len() / WAVEFORM_POINTS).max(1);
    out.extend(
        samples
            .iter()
            .step_by(stride)
            .take(WAVEFORM_POINTS)
            .map(|s| (s * DISPLAY_SCALE).clamp(-1.0, 1.0)),
    );
}

/// Encode normalized samples into the on-disk little-endian representation.
///
/// Int16 rounds `s * 32768` and clamps to `[-32768, 32767]`.
pub fn encode_samples(samples: &[f32], format: AudioFormat, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * format.bytes_per_sample());
    match format {
        AudioFormat::Int16 => {
            for &sample in samples {
                let scaled = (sample * INT16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32);
                out.extend_from_slice(&(scaled as i16).to_le_bytes());
            }
        }
        AudioFormat::Float32 => {
            for &sample in samples {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.log10()
}

/// Gain in dB that brings `peak` to `target`, clamped to `±limit_db`.
///
/// `None` when nothing has been measured yet.
pub fn auto_gain_db(peak: f32, target: f32, limit_db: f32) -> Option<f32> {
    if !(peak > 0.0) || !peak.is_finite() {
        return None;
    }
    Some(linear_to_db(target / peak).clamp(-limit_db, limit_db))
}
