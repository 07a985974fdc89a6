//! # multicapture-core
//!
//! Platform-agnostic multi-device capture engine.
//!
//! Opens one mono 44.1 kHz stream per selected input device, meters every
//! buffer on the real-time thread, streams samples to per-device WAV files
//! through a single ordered writer thread, and reopens streams that stop
//! delivering audio. Native backends (cpal, PortAudio-style bindings)
//! implement the `AudioBackend` trait and plug into `MultiCaptureEngine`.
//!
//! ## Architecture
//!
//! ```text
//! multicapture-core (this crate)
//! ├── traits/       ← AudioBackend, EngineDelegate, DirectoryAccess, Transcoder
//! ├── models/       ← CaptureError, RecordingState, EngineConfiguration, DeviceDescriptor
//! ├── processing/   ← gain/meter/downsample math, WAV header generation
//! ├── session/      ← DeviceRegistry, StreamController, HealthMonitor, MultiCaptureEngine
//! └── storage/      ← StreamingWriter, WriterQueue, FormatConverter, metadata
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    AudioFormat, DeviceDescriptor, DeviceDiagnostics, DeviceMeter, GainState, OutputFormat,
};
pub use models::config::EngineConfiguration;
pub use models::error::CaptureError;
pub use models::recording_result::{DeviceRecordingOutcome, RecordingMetadata, RecordingResult};
pub use models::state::RecordingState;
pub use session::controller::StreamController;
pub use session::engine::MultiCaptureEngine;
pub use session::health::{HealthMonitor, RecoveryOutcome};
pub use session::registry::DeviceRegistry;
pub use storage::converter::FormatConverter;
pub use storage::streaming_writer::{FinalizedFile, StreamingWriter};
pub use storage::writer_queue::WriterQueue;
pub use traits::audio_backend::{
    AudioBackend, HostApiInfo, InputBuffer, InputCallback, NativeDeviceInfo, StreamHandle,
    StreamParameters,
};
pub use traits::directory_access::{DirectoryAccess, FixedDirectory};
pub use traits::engine_delegate::EngineDelegate;
pub use traits::transcoder::Transcoder;
