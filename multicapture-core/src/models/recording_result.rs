use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, OutputFormat};
use super::config::{CHANNELS, SAMPLE_RATE};
use super::error::CaptureError;

/// A finished per-device recording, after any conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub device_id: i32,
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub data_bytes: u64,
    /// SHA-256 of the finalized WAV (before conversion).
    pub checksum: String,
    pub output_format: OutputFormat,
}

/// Outcome of stopping a recording for one device.
///
/// A conversion failure keeps the streamed WAV on disk; `fallback_path`
/// points at it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecordingOutcome {
    pub device_id: i32,
    pub result: Result<RecordingResult, CaptureError>,
    pub fallback_path: Option<PathBuf>,
}

/// Metadata written as a JSON sidecar next to a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub device_id: i32,
    pub device_name: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: AudioFormat,
    pub output_format: OutputFormat,
    /// Codec of the delivered file (`pcm` for WAV).
    pub codec: String,
}

impl RecordingMetadata {
    pub fn for_result(result: &RecordingResult, device_name: &str, encoding: AudioFormat) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: result.device_id,
            device_name: device_name.to_string(),
            duration_secs: result.duration_secs,
            file_path: result.file_path.to_string_lossy().to_string(),
            checksum: result.checksum.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            encoding,
            output_format: result.output_format,
            codec: result.output_format.spec().codec_id.to_string(),
        }
    }
}
