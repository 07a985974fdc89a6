use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, OutputFormat};
use super::error::CaptureError;

/// Native stream sample rate. Rate negotiation is not supported.
pub const SAMPLE_RATE: u32 = 44_100;

/// Streams are always opened mono.
pub const CHANNELS: u16 = 1;

/// Frames requested per native callback (≈5.8 ms at 44.1 kHz).
pub const FRAMES_PER_BUFFER: u32 = 256;

/// Maximum number of points in a published waveform.
pub const WAVEFORM_POINTS: usize = 100;

/// Engine configuration.
///
/// Durations are stored in milliseconds so the struct round-trips through
/// JSON settings files unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    /// Encoding for native streams and the streamed WAV files (default: Int16).
    pub audio_format: AudioFormat,

    /// Format delivered to the user after stop (default: Wav, no transcode).
    pub output_format: OutputFormat,

    /// Interval between health monitor ticks (default: 5000).
    pub health_check_interval_ms: u64,

    /// Inactivity after which a stream is considered stalled (default: 10000).
    pub stall_threshold_ms: u64,

    /// Minimum spacing of meter publications per device (default: 33, ≈30 Hz).
    pub meter_interval_ms: u64,

    /// Peak level auto-gain aims for (default: 0.5).
    pub auto_gain_target: f32,

    /// Gain is clamped to ±this many dB (default: 24).
    pub gain_limit_db: f32,

    /// Capacity of the callback → controlling thread meter channel.
    pub meter_queue_capacity: usize,

    /// Write a `.metadata.json` sidecar next to every finished recording.
    pub write_metadata_sidecar: bool,
}

impl EngineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.health_check_interval_ms == 0 {
            return Err("health check interval must be positive".into());
        }
        if self.stall_threshold_ms < self.health_check_interval_ms {
            return Err(format!(
                "stall threshold ({} ms) shorter than health interval ({} ms)",
                self.stall_threshold_ms, self.health_check_interval_ms
            ));
        }
        if !(self.auto_gain_target > 0.0 && self.auto_gain_target <= 1.0) {
            return Err(format!("auto-gain target out of range: {}", self.auto_gain_target));
        }
        if !(self.gain_limit_db.is_finite() && self.gain_limit_db > 0.0) {
            return Err(format!("invalid gain limit: {}", self.gain_limit_db));
        }
        if self.meter_queue_capacity == 0 {
            return Err("meter queue capacity must be positive".into());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid settings: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CaptureError> {
        let json = fs::read_to_string(path)
            .map_err(|e| {
                CaptureError::ConfigurationFailed(format!("failed to read settings: {}", e))
            })?;
        Self::from_json_str(&json)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            audio_format: AudioFormat::Int16,
            output_format: OutputFormat::Wav,
            health_check_interval_ms: 5_000,
            stall_threshold_ms: 10_000,
            meter_interval_ms: 33,
            auto_gain_target: 0.5,
            gain_limit_db: 24.0,
            meter_queue_capacity: 256,
            write_metadata_sidecar: false,
        }
    }
}
