use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::storage::streaming_writer::{FinalizedFile, StreamingWriter};

pub type FinalizeResults = Vec<(i32, Result<FinalizedFile, CaptureError>)>;

pub(crate) enum WriterCommand {
    Begin {
        device_id: i32,
        session: u64,
        writer: StreamingWriter,
    },
    Append {
        device_id: i32,
        session: u64,
        samples: Vec<f32>,
    },
    FinalizeAll { reply: Sender<FinalizeResults> },
    Barrier { reply: Sender<()> },
    Shutdown,
}

/// Producer side of the queue handed to real-time callbacks.
///
/// `submit` never blocks: the channel is unbounded, so a slow disk grows the
/// backlog instead of stalling the audio thread. Every buffer is stamped with
/// the recording session it was captured for; the worker drops buffers whose
/// session no longer owns the device's file.
#[derive(Clone)]
pub struct AppendSender {
    tx: Sender<WriterCommand>,
}

impl AppendSender {
    pub fn submit(&self, device_id: i32, session: u64, samples: Vec<f32>) {
        let command = WriterCommand::Append {
            device_id,
            session,
            samples,
        };
        if self.tx.send(command).is_err() {
            log::trace!("writer queue closed, dropping buffer for device {}", device_id);
        }
    }
}

/// Single ordered background queue executing every file append and finalize.
///
/// One worker thread drains the channel in FIFO order, so appends for a
/// device land on disk in callback order. Finalize and barrier requests block
/// the caller until everything queued before them has been written.
pub struct WriterQueue {
    tx: Sender<WriterCommand>,
    handle: Option<thread::JoinHandle<()>>,
    bytes_written: Arc<Mutex<HashMap<i32, u64>>>,
}

impl WriterQueue {
    pub fn start() -> Result<Self, CaptureError> {
        let (tx, rx) = unbounded();
        let bytes_written = Arc::new(Mutex::new(HashMap::new()));
        let counters = Arc::clone(&bytes_written);

        let handle = thread::Builder::new()
            .name("recording-writer".into())
            .spawn(move || writer_loop(rx, counters))
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn writer thread: {}", e)))?;

        Ok(Self {
            tx,
            handle: Some(handle),
            bytes_written,
        })
    }

    pub fn append_sender(&self) -> AppendSender {
        AppendSender { tx: self.tx.clone() }
    }

    /// Hand an opened writer to the worker. Appends for `device_id` stamped
    /// with `session` and queued after this call go to it.
    pub fn begin(
        &self,
        device_id: i32,
        session: u64,
        writer: StreamingWriter,
    ) -> Result<(), CaptureError> {
        self.bytes_written.lock().insert(device_id, 0);
        let command = WriterCommand::Begin {
            device_id,
            session,
            writer,
        };
        self.tx
            .send(command)
            .map_err(|_| CaptureError::StorageError("writer queue is not running".into()))
    }

    /// Drain all pending appends, then finalize and close every open file.
    pub fn finalize_all(&self) -> Result<FinalizeResults, CaptureError> {
        let (reply, done) = bounded(1);
        self.tx
            .send(WriterCommand::FinalizeAll { reply })
            .map_err(|_| CaptureError::StorageError("writer queue is not running".into()))?;
        done.recv()
            .map_err(|_| CaptureError::StorageError("writer thread exited during finalize".into()))
    }

    /// Block until every command queued so far has been executed.
    pub fn barrier(&self) -> Result<(), CaptureError> {
        let (reply, done) = bounded(1);
        self.tx
            .send(WriterCommand::Barrier { reply })
            .map_err(|_| CaptureError::StorageError("writer queue is not running".into()))?;
        done.recv()
            .map_err(|_| CaptureError::StorageError("writer thread exited during barrier".into()))
    }

    /// Payload bytes written for a device in the current or last recording.
    pub fn bytes_written(&self, device_id: i32) -> u64 {
        self.bytes_written.lock().get(&device_id).copied().unwrap_or(0)
    }

    /// Commands not yet picked up by the worker.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

impl Drop for WriterQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(rx: Receiver<WriterCommand>, bytes_written: Arc<Mutex<HashMap<i32, u64>>>) {
    let mut writers: HashMap<i32, (u64, StreamingWriter)> = HashMap::new();

    while let Ok(command) = rx.recv() {
        match command {
            WriterCommand::Begin {
                device_id,
                session,
                writer,
            } => {
                if let Some((_, previous)) = writers.insert(device_id, (session, writer)) {
                    log::warn!("Device {} already had an open recording, finalizing it", device_id);
                    if let Err(e) = previous.finalize() {
                        log::error!(
                            "Failed to finalize replaced recording for device {}: {}",
                            device_id,
                            e
                        );
                    }
                }
            }
            WriterCommand::Append {
                device_id,
                session,
                samples,
            } => {
                let writer = match writers.get_mut(&device_id) {
                    Some((open_session, writer)) if *open_session == session => writer,
                    Some((open_session, _)) => {
                        log::debug!(
                            "Dropping {} samples of session {} for device {} (file is session {})",
                            samples.len(),
                            session,
                            device_id,
                            open_session
                        );
                        continue;
                    }
                    None => {
                        log::debug!(
                            "Dropping {} samples for device {} with no open file",
                            samples.len(),
                            device_id
                        );
                        continue;
                    }
                };
                match writer.append(&samples) {
                    Ok(()) => {
                        bytes_written.lock().insert(device_id, writer.bytes_written());
                    }
                    Err(e) => log::error!("Failed to write audio for device {}: {}", device_id, e),
                }
            }
            WriterCommand::FinalizeAll { reply } => {
                let mut results: FinalizeResults = writers
                    .drain()
                    .map(|(device_id, (_, writer))| {
                        let result = writer.finalize();
                        if let Err(ref e) = result {
                            log::error!(
                                "Failed to finalize recording for device {}: {}",
                                device_id,
                                e
                            );
                        }
                        (device_id, result)
                    })
                    .collect();
                results.sort_by_key(|(device_id, _)| *device_id);
                let _ = reply.send(results);
            }
            WriterCommand::Barrier { reply } => {
                let _ = reply.send(());
            }
            WriterCommand::Shutdown => break,
        }
    }

    for (device_id, (_, writer)) in writers.drain() {
        log::warn!("Writer queue shutting down with open recording for device {}", device_id);
        if let Err(e) = writer.finalize() {
            log::error!("Failed to finalize recording for device {}: {}", device_id, e);
        }
    }
}
