pub mod converter;
pub mod metadata;
pub mod streaming_writer;
pub mod writer_queue;
