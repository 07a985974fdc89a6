pub mod audio_backend;
pub mod directory_access;
pub mod engine_delegate;
pub mod transcoder;
