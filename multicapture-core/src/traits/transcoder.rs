use std::path::{Path, PathBuf};

use crate::models::audio_models::OutputFormat;

/// External media transcoding service.
///
/// Codec, container and bitrate choices belong to the implementation. On
/// success it returns the path of the new file; the engine deletes the source.
pub trait Transcoder: Send {
    fn convert(&mut self, source: &Path, target: OutputFormat) -> Result<PathBuf, String>;
}
