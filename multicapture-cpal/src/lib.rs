//! # multicapture-cpal
//!
//! Native backend for multicapture-core built on cpal.
//!
//! Provides:
//! - `CpalBackend`: `AudioBackend` over the platform default cpal host
//!   (WASAPI on Windows, Core Audio on macOS)
//! - `CpalBackendError`: cpal failures, converted into `CaptureError`
//!
//! ## Usage
//! ```ignore
//! use multicapture_core::{EngineConfiguration, FixedDirectory, MultiCaptureEngine};
//! use multicapture_cpal::CpalBackend;
//!
//! let mut engine = MultiCaptureEngine::new(CpalBackend::new(), EngineConfiguration::default())?;
//! engine.set_directory_access(Box::new(FixedDirectory::new("/tmp/takes")));
//! for id in engine.devices().iter().map(|d| d.stable_id).collect::<Vec<_>>() {
//!     engine.start_device(id)?;
//! }
//! engine.start_recording()?;
//! ```

#[cfg(any(target_os = "windows", target_os = "macos"))]
pub mod cpal_backend;
#[cfg(any(target_os = "windows", target_os = "macos"))]
pub mod error;

#[cfg(any(target_os = "windows", target_os = "macos"))]
pub use cpal_backend::CpalBackend;
#[cfg(any(target_os = "windows", target_os = "macos"))]
pub use error::CpalBackendError;
