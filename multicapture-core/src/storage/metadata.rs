use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingMetadata;

/// `device_0_recording.wav` → `device_0_recording.metadata.json`
pub fn sidecar_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("metadata.json")
}

/// Write recording metadata as a JSON sidecar file.
pub fn write_metadata(
    metadata: &RecordingMetadata,
    recording_path: &Path,
) -> Result<PathBuf, CaptureError> {
    let metadata_path = sidecar_path(recording_path);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| CaptureError::storage("failed to serialize metadata", e))?;
    fs::write(&metadata_path, json)
        .map_err(|e| CaptureError::storage("failed to write metadata", e))?;
    Ok(metadata_path)
}

pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, CaptureError> {
    let json = fs::read_to_string(sidecar_path(recording_path))
        .map_err(|e| CaptureError::storage("failed to read metadata", e))?;
    serde_json::from_str(&json).map_err(|e| CaptureError::storage("failed to parse metadata", e))
}
