use crate::models::audio_models::DeviceDescriptor;
use crate::models::error::CaptureError;
use crate::traits::audio_backend::AudioBackend;

const UNKNOWN_HOST_API: &str = "Unknown";

/// Enumerates capture-capable devices and assigns per-epoch stable ids.
///
/// `stable_id` is the native index at enumeration time. It is not a hardware
/// key: a refresh after the device topology changed may map the same id to a
/// different device.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
    ready: bool,
}

impl DeviceRegistry {
    /// Registry for a backend that has already been initialized.
    pub fn with_backend(backend: &dyn AudioBackend) -> Self {
        Self {
            devices: enumerate(backend),
            ready: true,
        }
    }

    /// Registry after a failed initialization: empty and not ready.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn descriptor(&self, stable_id: i32) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.stable_id == stable_id)
    }

    /// Whether the last (re)initialization succeeded. New streams must not be
    /// started while this is false.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Reinitialize the native subsystem and enumerate again.
    ///
    /// All streams must already be closed. On failure the previous list is
    /// discarded and the registry stays empty until a refresh succeeds.
    pub fn refresh(
        &mut self,
        backend: &mut dyn AudioBackend,
    ) -> Result<&[DeviceDescriptor], CaptureError> {
        backend.terminate();
        if let Err(e) = backend.initialize() {
            log::error!("Audio backend failed to reinitialize: {}", e);
            self.devices.clear();
            self.ready = false;
            return Err(e);
        }
        self.devices = enumerate(backend);
        self.ready = true;
        log::info!("Device refresh found {} input devices", self.devices.len());
        Ok(&self.devices)
    }
}

/// List input-capable devices in native index order.
///
/// Indices whose info cannot be read are skipped.
pub fn enumerate(backend: &dyn AudioBackend) -> Vec<DeviceDescriptor> {
    let count = match backend.device_count() {
        Ok(count) => count,
        Err(e) => {
            log::error!("Failed to count audio devices: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for index in 0..count {
        let Some(info) = backend.device_info(index) else {
            log::warn!("Skipping device {}: info unavailable", index);
            continue;
        };
        if info.max_input_channels <= 0 {
            continue;
        }
        let host_api_name = backend
            .host_api_info(info.host_api_index)
            .map(|api| api.name)
            .unwrap_or_else(|| UNKNOWN_HOST_API.to_string());

        devices.push(DeviceDescriptor {
            stable_id: index,
            native_index: index,
            name: info.name,
            host_api_name,
            max_input_channels: info.max_input_channels,
            default_low_input_latency: info.default_low_input_latency,
            default_sample_rate: info.default_sample_rate,
        });
    }
    log::debug!("Enumerated {} of {} devices as inputs", devices.len(), count);
    devices
}
