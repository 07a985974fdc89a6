use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;

/// Raw samples delivered by one native callback.
///
/// The variant matches the [`AudioFormat`] the stream was opened with.
#[derive(Debug, Clone, Copy)]
pub enum InputBuffer<'a> {
    Int16(&'a [i16]),
    Float32(&'a [f32]),
}

impl InputBuffer<'_> {
    pub fn format(&self) -> AudioFormat {
        match self {
            Self::Int16(_) => AudioFormat::Int16,
            Self::Float32(_) => AudioFormat::Float32,
        }
    }

    /// Frame count for a mono stream.
    pub fn len(&self) -> usize {
        match self {
            Self::Int16(samples) => samples.len(),
            Self::Float32(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callback invoked on the backend's real-time thread once per buffer period.
///
/// `None` stands for a missing sample buffer. The backend owns the closure for
/// exactly as long as the stream is open and drops it on close.
pub type InputCallback = Box<dyn FnMut(Option<InputBuffer<'_>>) + Send + 'static>;

/// Device information as reported by the backend for one native index.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeDeviceInfo {
    pub name: String,
    pub host_api_index: i32,
    pub max_input_channels: i32,
    pub max_output_channels: i32,
    pub default_low_input_latency: f64,
    pub default_sample_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostApiInfo {
    pub name: String,
}

/// Parameters for opening an input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParameters {
    pub device_index: i32,
    pub channels: u16,
    pub format: AudioFormat,
    /// Suggested latency in seconds.
    pub suggested_latency: f64,
    pub sample_rate: f64,
    pub frames_per_buffer: u32,
    pub clip_off: bool,
}

/// Opaque handle to an open native stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Pull-model native audio API.
///
/// All methods are called from the controlling thread. Implementations:
/// - `CpalBackend` (multicapture-cpal)
/// - `MockBackend` (tests)
pub trait AudioBackend {
    /// Bring the native subsystem up. Called again on every device refresh.
    fn initialize(&mut self) -> Result<(), CaptureError>;

    /// Tear the native subsystem down. All streams must be closed first.
    fn terminate(&mut self);

    fn device_count(&self) -> Result<i32, CaptureError>;

    /// `None` if the index cannot be queried.
    fn device_info(&self, index: i32) -> Option<NativeDeviceInfo>;

    fn host_api_info(&self, index: i32) -> Option<HostApiInfo>;

    /// Open an input stream. On error the callback has already been dropped.
    fn open_stream(
        &mut self,
        params: &StreamParameters,
        callback: InputCallback,
    ) -> Result<StreamHandle, CaptureError>;

    fn start_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError>;

    fn stop_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError>;

    /// Close a stream and drop its callback. No callback runs after this returns.
    fn close_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError>;

    /// Drain errors reported by running streams since the last call, as
    /// `(device index, message)` pairs.
    fn take_stream_errors(&mut self) -> Vec<(i32, String)> {
        Vec::new()
    }
}
