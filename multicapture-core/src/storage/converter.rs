use std::fs;
use std::path::{Path, PathBuf};

use crate::models::audio_models::OutputFormat;
use crate::models::error::CaptureError;
use crate::traits::transcoder::Transcoder;

/// Post-recording conversion of finalized WAV files.
///
/// Deletes the source after a successful transcode; on failure the source is
/// left in place and the error is returned.
pub struct FormatConverter {
    transcoder: Option<Box<dyn Transcoder>>,
}

impl FormatConverter {
    pub fn new(transcoder: Option<Box<dyn Transcoder>>) -> Self {
        Self { transcoder }
    }

    pub fn set_transcoder(&mut self, transcoder: Box<dyn Transcoder>) {
        self.transcoder = Some(transcoder);
    }

    pub fn convert(
        &mut self,
        source: &Path,
        target: OutputFormat,
    ) -> Result<PathBuf, CaptureError> {
        if target.is_raw_stream() {
            return Ok(source.to_path_buf());
        }
        let transcoder = self
            .transcoder
            .as_mut()
            .ok_or_else(|| {
                CaptureError::ConversionFailed(format!("no transcoder for {:?}", target))
            })?;

        let output = transcoder.convert(source, target).map_err(|reason| {
            log::warn!("Conversion of {} to {:?} failed: {}", source.display(), target, reason);
            CaptureError::ConversionFailed(reason)
        })?;

        if output != source {
            if let Err(e) = fs::remove_file(source) {
                log::warn!("Converted {} but could not remove source: {}", source.display(), e);
            }
        }
        log::info!("Converted {} -> {}", source.display(), output.display());
        Ok(output)
    }
}
