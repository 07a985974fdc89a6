use crate::models::audio_models::DeviceMeter;
use crate::models::error::CaptureError;
use crate::models::recording_result::DeviceRecordingOutcome;

/// Event delegate for engine notifications.
///
/// All methods are called on the controlling thread from inside engine
/// operations (`poll`, `health_tick`, `stop_recording`), never from the
/// real-time callback.
pub trait EngineDelegate: Send + Sync {
    /// Called when a device's meter state was replaced by a fresh publication.
    fn on_levels_updated(&self, device_id: i32, meter: &DeviceMeter);

    /// Called after the health monitor reopened a stalled stream.
    fn on_device_recovered(&self, device_id: i32);

    /// Called for per-device failures the caller did not request directly.
    fn on_error(&self, device_id: Option<i32>, error: &CaptureError);

    /// Called once all files of a recording are finalized (and converted).
    fn on_recording_finished(&self, outcomes: &[DeviceRecordingOutcome]);
}
