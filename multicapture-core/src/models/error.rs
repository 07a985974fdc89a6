use thiserror::Error;

/// Errors surfaced by controlling-thread operations.
///
/// The real-time callback never produces these; it logs and returns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("device {0} not available")]
    DeviceNotAvailable(i32),

    #[error("failed to open stream for device {device_id}: {reason}")]
    StreamOpenFailed { device_id: i32, reason: String },

    #[error("failed to start stream for device {device_id}: {reason}")]
    StreamStartFailed { device_id: i32, reason: String },

    #[error("stream for device {device_id} failed: {reason}")]
    StreamFailed { device_id: i32, reason: String },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("export directory unavailable")]
    DirectoryUnavailable,

    #[error("a recording is in progress")]
    RecordingInProgress,

    #[error("not recording")]
    NotRecording,

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::StorageError(format!("{}: {}", context, err))
    }
}
