pub mod signal;
pub mod wav_format;
