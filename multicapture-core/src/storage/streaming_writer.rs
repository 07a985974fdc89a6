use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;
use crate::processing::signal;
use crate::processing::wav_format::{self, WAV_HEADER_SIZE};

const COPY_CHUNK: usize = 64 * 1024;

/// Streaming WAV writer for a recording of unknown final length.
///
/// ## File Format
///
/// While recording:
/// ```text
/// [44-byte header, fileSize = dataSize = 0xFFFFFFFF]
/// [raw samples in the configured encoding...]
/// ```
///
/// `finalize` copies the payload behind a header with the real sizes.
///
/// Appends go straight to the file; nothing is held back between calls.
/// The writer is owned by the I/O queue worker, never by the audio thread.
pub struct StreamingWriter {
    file_path: PathBuf,
    format: AudioFormat,
    file: File,
    bytes_since_header: u64,
    scratch: Vec<u8>,
}

/// A finished, correctly-sized WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFile {
    pub path: PathBuf,
    pub data_bytes: u64,
    pub checksum: String,
}

impl StreamingWriter {
    /// Create the file and write the placeholder header.
    pub fn open(file_path: PathBuf, format: AudioFormat) -> Result<Self, CaptureError> {
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::storage("failed to create directory", e))?;
        }

        let mut file = File::create(&file_path)
            .map_err(|e| CaptureError::storage("failed to create file", e))?;
        file.write_all(&wav_format::placeholder_header(format))
            .map_err(|e| CaptureError::storage("failed to write header", e))?;

        log::debug!("Opened streaming recording {}", file_path.display());
        Ok(Self {
            file_path,
            format,
            file,
            bytes_since_header: 0,
            scratch: Vec::new(),
        })
    }

    /// Encode and append normalized samples.
    pub fn append(&mut self, samples: &[f32]) -> Result<(), CaptureError> {
        if samples.is_empty() {
            return Ok(());
        }
        signal::encode_samples(samples, self.format, &mut self.scratch);
        self.file
            .write_all(&self.scratch)
            .map_err(|e| CaptureError::storage("write failed", e))?;
        self.bytes_since_header += self.scratch.len() as u64;
        Ok(())
    }

    /// Close the handle and replace the file with a correctly-sized copy.
    ///
    /// The final header and the payload are streamed into a sibling
    /// temporary file, hashed on the way, then renamed over the original.
    /// The recording on disk stays intact until the rename succeeds.
    pub fn finalize(self) -> Result<FinalizedFile, CaptureError> {
        let Self {
            file_path,
            format,
            mut file,
            bytes_since_header,
            ..
        } = self;

        file.flush().map_err(|e| CaptureError::storage("flush failed", e))?;
        drop(file);

        let mut source = File::open(&file_path)
            .map_err(|e| CaptureError::storage("failed to reopen recording", e))?;
        let file_len = source
            .metadata()
            .map_err(|e| CaptureError::storage("failed to stat recording", e))?
            .len();
        if file_len < WAV_HEADER_SIZE as u64 {
            return Err(CaptureError::StorageError(format!(
                "{} is truncated ({} bytes)",
                file_path.display(),
                file_len
            )));
        }
        let data_bytes = file_len - WAV_HEADER_SIZE as u64;
        if data_bytes != bytes_since_header {
            log::warn!(
                "{}: {} payload bytes on disk, {} appended",
                file_path.display(),
                data_bytes,
                bytes_since_header
            );
        }

        let parent = match file_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let staged = NamedTempFile::new_in(parent)
            .map_err(|e| CaptureError::storage("failed to create temporary file", e))?;

        let header = wav_format::final_header(format, file_len);
        let mut hasher = Sha256::new();
        hasher.update(header);
        let mut out = BufWriter::new(staged);
        out.write_all(&header)
            .map_err(|e| CaptureError::storage("failed to write header", e))?;

        source
            .seek(SeekFrom::Start(WAV_HEADER_SIZE as u64))
            .map_err(|e| CaptureError::storage("failed to seek recording", e))?;
        let mut chunk = vec![0u8; COPY_CHUNK];
        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaptureError::storage("failed to read recording", e)),
            };
            hasher.update(&chunk[..n]);
            out.write_all(&chunk[..n])
                .map_err(|e| CaptureError::storage("failed to copy recording", e))?;
        }
        drop(source);

        let staged = out
            .into_inner()
            .map_err(|e| CaptureError::storage("failed to flush recording", e.error()))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| CaptureError::storage("failed to sync recording", e))?;
        staged
            .persist(&file_path)
            .map_err(|e| CaptureError::storage("failed to replace recording", e.error))?;

        let checksum = hex_encode(&hasher.finalize());
        log::info!("Finalized {} ({} data bytes)", file_path.display(), data_bytes);
        Ok(FinalizedFile {
            path: file_path,
            data_bytes,
            checksum,
        })
    }

    /// Payload bytes appended so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_since_header
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
