use serde::{Deserialize, Serialize};

/// Sample encoding used both on the native stream and in the streamed WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Int16,
    Float32,
}

/// Derived constants for an [`AudioFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormatSpec {
    pub bits_per_sample: u16,
    /// WAVE `fmt ` audio format code: 1 = PCM, 3 = IEEE float.
    pub wav_format_code: u16,
}

impl AudioFormat {
    pub const fn spec(self) -> AudioFormatSpec {
        match self {
            Self::Int16 => AudioFormatSpec {
                bits_per_sample: 16,
                wav_format_code: 1,
            },
            Self::Float32 => AudioFormatSpec {
                bits_per_sample: 32,
                wav_format_code: 3,
            },
        }
    }

    pub const fn bits_per_sample(self) -> u16 {
        self.spec().bits_per_sample
    }

    pub const fn bytes_per_sample(self) -> usize {
        self.spec().bits_per_sample as usize / 8
    }

    pub const fn wav_format_code(self) -> u16 {
        self.spec().wav_format_code
    }
}

/// Delivery format selected by the user for finished recordings.
///
/// Only [`OutputFormat::Wav`] is written directly; the others go through a
/// [`Transcoder`](crate::traits::transcoder::Transcoder) after finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Wav,
    Flac,
    Mp3,
    M4a,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormatSpec {
    pub extension: &'static str,
    pub codec_id: &'static str,
    pub is_raw_stream: bool,
}

impl OutputFormat {
    pub const fn spec(self) -> OutputFormatSpec {
        match self {
            Self::Wav => OutputFormatSpec {
                extension: "wav",
                codec_id: "pcm",
                is_raw_stream: true,
            },
            Self::Flac => OutputFormatSpec {
                extension: "flac",
                codec_id: "flac",
                is_raw_stream: false,
            },
            Self::Mp3 => OutputFormatSpec {
                extension: "mp3",
                codec_id: "mp3",
                is_raw_stream: false,
            },
            Self::M4a => OutputFormatSpec {
                extension: "m4a",
                codec_id: "aac",
                is_raw_stream: false,
            },
        }
    }

    pub const fn extension(self) -> &'static str {
        self.spec().extension
    }

    pub const fn is_raw_stream(self) -> bool {
        self.spec().is_raw_stream
    }
}

/// A capture-capable device as seen at the last enumeration.
///
/// `stable_id` is only unique within one enumeration epoch; a refresh may hand
/// the same id to a different physical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub stable_id: i32,
    pub native_index: i32,
    pub name: String,
    pub host_api_name: String,
    pub max_input_channels: i32,
    pub default_low_input_latency: f64,
    pub default_sample_rate: f64,
}

/// Gain and peak tracking for one device, in linear units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainState {
    pub linear_gain: f32,
    pub peak_since_reset: f32,
}

impl Default for GainState {
    fn default() -> Self {
        Self {
            linear_gain: 1.0,
            peak_since_reset: 0.0,
        }
    }
}

/// Latest published meter values for one device (display-scaled, 0.0–1.0).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMeter {
    pub smoothed_rms: f32,
    pub peak: f32,
    pub waveform: Vec<f32>,
    /// Number of callbacks observed for the device, as of the last publication.
    pub activity_count: u64,
}

/// Counters for debugging a device's capture pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiagnostics {
    pub callback_count: u64,
    pub samples_total: u64,
    pub recoveries: u64,
    pub bytes_written: u64,
}
