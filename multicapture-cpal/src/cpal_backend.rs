//! `AudioBackend` over the platform default cpal host.
//!
//! cpal has no host-API index space or per-stream clipping switch, so the
//! whole host is reported as host API 0 and `clip_off` is ignored (samples
//! are never clipped by cpal itself).

use std::collections::BTreeMap;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig, SupportedBufferSize};
use parking_lot::Mutex;

use multicapture_core::models::audio_models::AudioFormat;
use multicapture_core::models::error::CaptureError;
use multicapture_core::traits::audio_backend::{
    AudioBackend, HostApiInfo, InputBuffer, InputCallback, NativeDeviceInfo, StreamHandle,
    StreamParameters,
};

use crate::error::CpalBackendError;

/// cpal-backed device enumeration and input streams.
///
/// Device indices are positions in `host.devices()` at the last
/// `initialize`. Streams are `!Send` on some hosts, so the backend stays on
/// the engine's controlling thread.
pub struct CpalBackend {
    host: Option<cpal::Host>,
    devices: Vec<cpal::Device>,
    streams: BTreeMap<u64, cpal::Stream>,
    next_handle: u64,
    /// Last error per device index, filled by cpal's error callbacks.
    stream_errors: Arc<Mutex<BTreeMap<i32, String>>>,
}

impl CpalBackend {
    /// Backend for the platform default host. The host is acquired by
    /// `initialize`, which the engine calls on construction.
    pub fn new() -> Self {
        Self {
            host: None,
            devices: Vec::new(),
            streams: BTreeMap::new(),
            next_handle: 1,
            stream_errors: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn device(&self, index: i32) -> Result<&cpal::Device, CpalBackendError> {
        if self.host.is_none() {
            return Err(CpalBackendError::NotInitialized);
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| self.devices.get(i))
            .ok_or(CpalBackendError::NoSuchDevice(index))
    }

    fn stream(&self, handle: StreamHandle) -> Result<&cpal::Stream, CpalBackendError> {
        self.streams
            .get(&handle.0)
            .ok_or(CpalBackendError::UnknownStream(handle.0))
    }

    fn build_stream(
        &self,
        params: &StreamParameters,
        mut callback: InputCallback,
    ) -> Result<cpal::Stream, CpalBackendError> {
        let device = self.device(params.device_index)?;
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: SampleRate(params.sample_rate as u32),
            buffer_size: BufferSize::Fixed(params.frames_per_buffer),
        };

        let device_index = params.device_index;
        let errors = Arc::clone(&self.stream_errors);
        let on_error = move |err: cpal::StreamError| {
            log::error!("Stream error on device {}: {}", device_index, err);
            errors.lock().insert(device_index, err.to_string());
        };

        let stream = match params.format {
            AudioFormat::Int16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    callback(Some(InputBuffer::Int16(data)))
                },
                on_error,
                None,
            )?,
            AudioFormat::Float32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    callback(Some(InputBuffer::Float32(data)))
                },
                on_error,
                None,
            )?,
        };
        Ok(stream)
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn initialize(&mut self) -> Result<(), CaptureError> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host.devices().map_err(CpalBackendError::from)?.collect();
        log::info!("cpal host {} with {} devices", host.id().name(), devices.len());
        self.devices = devices;
        self.host = Some(host);
        Ok(())
    }

    fn terminate(&mut self) {
        if !self.streams.is_empty() {
            log::warn!("Terminating cpal host with {} open streams", self.streams.len());
            self.streams.clear();
        }
        self.devices.clear();
        self.host = None;
        self.stream_errors.lock().clear();
    }

    fn device_count(&self) -> Result<i32, CaptureError> {
        if self.host.is_none() {
            return Err(CpalBackendError::NotInitialized.into());
        }
        Ok(self.devices.len() as i32)
    }

    fn device_info(&self, index: i32) -> Option<NativeDeviceInfo> {
        let device = self.device(index).ok()?;
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                log::warn!("Failed to read name of device {}: {}", index, e);
                return None;
            }
        };

        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels() as i32).max().unwrap_or(0))
            .unwrap_or(0);
        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels() as i32).max().unwrap_or(0))
            .unwrap_or(0);

        let (default_sample_rate, default_low_input_latency) = match device.default_input_config() {
            Ok(config) => {
                let rate = config.sample_rate().0 as f64;
                let latency = match config.buffer_size() {
                    SupportedBufferSize::Range { min, .. } if rate > 0.0 => *min as f64 / rate,
                    _ => 0.0,
                };
                (rate, latency)
            }
            Err(_) => (0.0, 0.0),
        };

        Some(NativeDeviceInfo {
            name,
            host_api_index: 0,
            max_input_channels,
            max_output_channels,
            default_low_input_latency,
            default_sample_rate,
        })
    }

    fn host_api_info(&self, index: i32) -> Option<HostApiInfo> {
        let host = self.host.as_ref()?;
        (index == 0).then(|| HostApiInfo {
            name: host.id().name().to_string(),
        })
    }

    fn open_stream(
        &mut self,
        params: &StreamParameters,
        callback: InputCallback,
    ) -> Result<StreamHandle, CaptureError> {
        let stream = self.build_stream(params, callback)?;
        // Some hosts start streams on creation; keep them idle until start_stream.
        if let Err(e) = stream.pause() {
            log::debug!("Could not pause new stream for device {}: {}", params.device_index, e);
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.streams.insert(handle, stream);
        log::debug!(
            "Opened cpal stream {} on device {} ({:?}, {} frames)",
            handle,
            params.device_index,
            params.format,
            params.frames_per_buffer
        );
        Ok(StreamHandle(handle))
    }

    fn start_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError> {
        self.stream(handle)?.play().map_err(CpalBackendError::from)?;
        Ok(())
    }

    fn stop_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError> {
        self.stream(handle)?.pause().map_err(CpalBackendError::from)?;
        Ok(())
    }

    fn close_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError> {
        // Dropping the stream joins cpal's callback thread and drops the callback.
        self.streams
            .remove(&handle.0)
            .map(drop)
            .ok_or_else(|| CpalBackendError::UnknownStream(handle.0).into())
    }

    fn take_stream_errors(&mut self) -> Vec<(i32, String)> {
        std::mem::take(&mut *self.stream_errors.lock()).into_iter().collect()
    }
}
