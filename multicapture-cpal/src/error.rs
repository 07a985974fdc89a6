use thiserror::Error;

use multicapture_core::models::error::CaptureError;

/// Failures raised by the cpal host.
#[derive(Debug, Error)]
pub enum CpalBackendError {
    #[error("audio host is not initialized")]
    NotInitialized,

    #[error("no device at index {0}")]
    NoSuchDevice(i32),

    #[error("unknown stream handle {0}")]
    UnknownStream(u64),

    #[error("failed to list devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to build stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to play stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("failed to pause stream: {0}")]
    Pause(#[from] cpal::PauseStreamError),
}

impl From<CpalBackendError> for CaptureError {
    fn from(err: CpalBackendError) -> Self {
        match err {
            CpalBackendError::NotInitialized | CpalBackendError::Devices(_) => {
                CaptureError::BackendUnavailable(err.to_string())
            }
            CpalBackendError::NoSuchDevice(index) => CaptureError::DeviceNotAvailable(index),
            other => CaptureError::Unknown(other.to_string()),
        }
    }
}
