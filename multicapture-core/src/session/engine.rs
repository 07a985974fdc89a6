use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver};

use crate::models::audio_models::{
    AudioFormat, DeviceDescriptor, DeviceDiagnostics, DeviceMeter, GainState, OutputFormat,
};
use crate::models::config::{EngineConfiguration, CHANNELS, SAMPLE_RATE};
use crate::models::error::CaptureError;
use crate::models::recording_result::{DeviceRecordingOutcome, RecordingMetadata, RecordingResult};
use crate::models::state::RecordingState;
use crate::processing::signal;
use crate::session::callback::{EngineShared, MeterUpdate};
use crate::session::controller::StreamController;
use crate::session::health::{HealthMonitor, RecoveryOutcome};
use crate::session::registry::DeviceRegistry;
use crate::storage::converter::FormatConverter;
use crate::storage::metadata;
use crate::storage::streaming_writer::{FinalizedFile, StreamingWriter};
use crate::storage::writer_queue::WriterQueue;
use crate::traits::audio_backend::AudioBackend;
use crate::traits::directory_access::DirectoryAccess;
use crate::traits::engine_delegate::EngineDelegate;
use crate::traits::transcoder::Transcoder;

/// Multi-device capture engine.
///
/// Owns the device registry, one stream per selected device, the health
/// monitor and the recording writer queue. Every method must be called from
/// the same controlling thread; the host drives time by calling [`poll`].
///
/// ```text
/// [Device 0 callback] ─┐                     ┌→ meters → poll() → delegate
/// [Device 1 callback] ─┼→ gain → meter/appends┤
/// [Device N callback] ─┘                     └→ WriterQueue → <label>_recording.wav
/// ```
///
/// [`poll`]: MultiCaptureEngine::poll
pub struct MultiCaptureEngine<B: AudioBackend> {
    config: EngineConfiguration,
    registry: DeviceRegistry,
    controller: StreamController<B>,
    health: HealthMonitor,
    queue: WriterQueue,
    meter_rx: Receiver<MeterUpdate>,
    converter: FormatConverter,
    labels: HashMap<i32, String>,
    directory: Option<Box<dyn DirectoryAccess>>,
    delegate: Option<Arc<dyn EngineDelegate>>,
    state: RecordingState,
    recording_started: Option<Instant>,
    /// Last recording session number handed out; sessions start at 1.
    recording_session: u64,
}

impl<B: AudioBackend> MultiCaptureEngine<B> {
    /// Initialize the backend and enumerate devices.
    ///
    /// A backend that fails to initialize is not fatal: the engine starts with
    /// an empty device list and [`refresh_devices`](Self::refresh_devices) can
    /// retry later.
    pub fn new(mut backend: B, config: EngineConfiguration) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let registry = match backend.initialize() {
            Ok(()) => DeviceRegistry::with_backend(&backend),
            Err(e) => {
                log::error!("Audio backend failed to initialize: {}", e);
                DeviceRegistry::unavailable()
            }
        };

        let queue = WriterQueue::start()?;
        let (meter_tx, meter_rx) = bounded(config.meter_queue_capacity);
        let shared = Arc::new(EngineShared::new(
            config.meter_interval(),
            meter_tx,
            queue.append_sender(),
        ));

        log::info!(
            "Capture engine ready: {} input devices, {:?} encoding",
            registry.devices().len(),
            config.audio_format
        );

        Ok(Self {
            health: HealthMonitor::new(config.health_check_interval(), config.stall_threshold()),
            controller: StreamController::new(backend, shared),
            registry,
            queue,
            meter_rx,
            converter: FormatConverter::new(None),
            labels: HashMap::new(),
            directory: None,
            delegate: None,
            state: RecordingState::Idle,
            recording_started: None,
            recording_session: 0,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfiguration {
        &self.config
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn EngineDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn set_directory_access(&mut self, directory: Box<dyn DirectoryAccess>) {
        self.directory = Some(directory);
    }

    pub fn set_transcoder(&mut self, transcoder: Box<dyn Transcoder>) {
        self.converter.set_transcoder(transcoder);
    }

    // -- devices --

    pub fn devices(&self) -> &[DeviceDescriptor] {
        self.registry.devices()
    }

    /// Stop every stream, reinitialize the backend and enumerate again.
    ///
    /// The active set is cleared; callers reselect devices afterwards.
    pub fn refresh_devices(&mut self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        if !self.state.is_idle() {
            return Err(CaptureError::RecordingInProgress);
        }
        self.controller.stop_all();
        while self.meter_rx.try_recv().is_ok() {}
        let devices = self.registry.refresh(self.controller.backend_mut())?;
        Ok(devices.to_vec())
    }

    /// Select a device and (re)open its stream.
    pub fn start_device(&mut self, device_id: i32) -> Result<(), CaptureError> {
        if !self.registry.is_ready() {
            return Err(CaptureError::BackendUnavailable("device list is not initialized".into()));
        }
        let descriptor = self
            .registry
            .descriptor(device_id)
            .cloned()
            .ok_or(CaptureError::DeviceNotAvailable(device_id))?;
        self.controller.start_device(&descriptor, self.config.audio_format)
    }

    /// Deselect a device and close its stream. Returns whether it was open.
    pub fn stop_device(&mut self, device_id: i32) -> bool {
        self.controller.stop_device(device_id)
    }

    pub fn active_devices(&self) -> Vec<i32> {
        self.controller.active_devices()
    }

    // -- gain --

    /// Set a device's gain in dB, clamped to the configured limit.
    /// Returns the gain actually applied.
    pub fn set_device_gain(&mut self, device_id: i32, db: f32) -> f32 {
        let limit = self.config.gain_limit_db;
        let applied = if db.is_finite() {
            db.clamp(-limit, limit)
        } else {
            log::warn!("Ignoring non-finite gain {} for device {}", db, device_id);
            0.0
        };
        self.controller.slot(device_id).gain.store(signal::db_to_linear(applied));
        log::debug!("Device {} gain set to {:.2} dB", device_id, applied);
        applied
    }

    /// Current gain in dB (0 for devices never touched).
    pub fn device_gain(&self, device_id: i32) -> f32 {
        signal::linear_to_db(self.controller.gain_state(device_id).linear_gain)
    }

    pub fn gain_state(&self, device_id: i32) -> GainState {
        self.controller.gain_state(device_id)
    }

    /// Set gain so the peak since the last reset lands on the auto-gain
    /// target, then reset peak tracking. `None` if no peak was measured.
    pub fn auto_gain(&mut self, device_id: i32) -> Option<f32> {
        let peak = self.controller.gain_state(device_id).peak_since_reset;
        let db =
            signal::auto_gain_db(peak, self.config.auto_gain_target, self.config.gain_limit_db)?;
        let applied = self.set_device_gain(device_id, db);
        self.reset_peak(device_id);
        log::info!("Auto-gain for device {}: peak {:.3} -> {:+.2} dB", device_id, peak, applied);
        Some(applied)
    }

    pub fn reset_peak(&mut self, device_id: i32) {
        self.controller.slot(device_id).peak.store(0.0);
    }

    pub fn peak(&self, device_id: i32) -> f32 {
        self.controller.gain_state(device_id).peak_since_reset
    }

    // -- formats and labels --

    pub fn set_device_label(&mut self, device_id: i32, label: impl Into<String>) {
        let label = label.into();
        if label.trim().is_empty() {
            self.labels.remove(&device_id);
        } else {
            self.labels.insert(device_id, label);
        }
    }

    pub fn device_label(&self, device_id: i32) -> Option<&str> {
        self.labels.get(&device_id).map(String::as_str)
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.config.audio_format
    }

    /// Change the stream encoding. Active streams are reopened with it.
    ///
    /// Devices that fail to reopen drop out of the active set and are
    /// reported to the delegate.
    pub fn set_audio_format(&mut self, format: AudioFormat) -> Result<(), CaptureError> {
        if !self.state.is_idle() {
            return Err(CaptureError::RecordingInProgress);
        }
        if format == self.config.audio_format {
            return Ok(());
        }
        self.config.audio_format = format;
        log::info!("Audio format changed to {:?}, reopening streams", format);

        for device_id in self.controller.active_devices() {
            if let Err(e) = self.start_device(device_id) {
                self.notify_error(Some(device_id), &e);
            }
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        self.config.output_format
    }

    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.config.output_format = format;
    }

    // -- recording --

    pub fn recording_state(&self) -> &RecordingState {
        &self.state
    }

    /// Seconds since `start_recording`, 0 when idle.
    pub fn recording_duration(&self) -> f64 {
        self.recording_started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }

    /// Open one streaming file per active device and start routing samples.
    ///
    /// Devices whose file cannot be created are reported and skipped; the call
    /// fails only if no file could be opened. Returns the recording devices.
    pub fn start_recording(&mut self) -> Result<Vec<i32>, CaptureError> {
        if !self.state.is_idle() {
            return Err(CaptureError::RecordingInProgress);
        }
        let active = self.controller.active_devices();
        if active.is_empty() {
            return Err(CaptureError::ConfigurationFailed("no devices selected".into()));
        }
        let directory = self.acquire_directory()?;

        // Previous session's appends and finalize must be fully drained.
        if let Err(e) = self.queue.barrier() {
            self.release_directory();
            return Err(e);
        }

        self.recording_session += 1;
        let session = self.recording_session;
        let format = self.config.audio_format;
        let mut used_names = HashSet::new();
        let mut recording = Vec::new();
        let mut last_error = None;

        for device_id in active {
            let path = directory.join(self.file_name(device_id, &mut used_names));
            let opened = StreamingWriter::open(path, format)
                .and_then(|writer| self.queue.begin(device_id, session, writer));
            match opened {
                Ok(()) => recording.push(device_id),
                Err(e) => {
                    log::error!("Failed to open recording for device {}: {}", device_id, e);
                    self.notify_error(Some(device_id), &e);
                    last_error = Some(e);
                }
            }
        }

        if recording.is_empty() {
            self.release_directory();
            return Err(last_error.unwrap_or(CaptureError::NotRecording));
        }
        for &device_id in &recording {
            self.controller.slot(device_id).begin_recording(session);
        }

        log::info!(
            "Recording session {} started for devices {:?} in {}",
            session,
            recording,
            directory.display()
        );
        self.state = RecordingState::Recording {
            device_ids: recording.clone(),
        };
        self.recording_started = Some(Instant::now());
        Ok(recording)
    }

    /// Stop routing samples, finalize every file, then convert if needed.
    ///
    /// Blocks until all files are complete on disk. Per-device failures are
    /// returned in the outcomes rather than as an error.
    pub fn stop_recording(&mut self) -> Result<Vec<DeviceRecordingOutcome>, CaptureError> {
        let device_ids = match &self.state {
            RecordingState::Recording { device_ids } => device_ids.clone(),
            _ => return Err(CaptureError::NotRecording),
        };
        self.state = RecordingState::Finalizing;
        for &device_id in &device_ids {
            self.controller.slot(device_id).end_recording();
        }

        let finalized = match self.queue.finalize_all() {
            Ok(finalized) => finalized,
            Err(e) => {
                log::error!("Writer queue failed during finalize: {}", e);
                self.finish_recording();
                return Err(e);
            }
        };

        let outcomes: Vec<DeviceRecordingOutcome> = finalized
            .into_iter()
            .map(|(device_id, result)| self.complete_file(device_id, result))
            .collect();

        let elapsed = self.recording_duration();
        self.finish_recording();
        log::info!("Recording stopped after {:.1} s, {} files finalized", elapsed, outcomes.len());
        if let Some(delegate) = &self.delegate {
            delegate.on_recording_finished(&outcomes);
        }
        Ok(outcomes)
    }

    // -- polling --

    /// Drain meter publications and run the health monitor when due.
    ///
    /// Hosts call this from their event loop (a ~30 Hz timer works well).
    pub fn poll(&mut self, now: Instant) -> Vec<RecoveryOutcome> {
        self.pump_meters();
        self.pump_stream_errors();
        if self.health.is_due(now) {
            self.health_tick(now)
        } else {
            Vec::new()
        }
    }

    /// Apply pending meter publications. Returns how many were applied.
    pub fn pump_meters(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.meter_rx.try_recv() {
            if let Some(meter) = self.controller.apply_meter_update(&update) {
                applied += 1;
                if let Some(delegate) = &self.delegate {
                    delegate.on_levels_updated(update.device_id, meter);
                }
            }
        }
        applied
    }

    /// Report failures the backend saw on running streams. Reopening is left
    /// to the health monitor once the stream stops delivering.
    fn pump_stream_errors(&mut self) {
        for (device_index, reason) in self.controller.backend_mut().take_stream_errors() {
            let device_id = self
                .registry
                .devices()
                .iter()
                .find(|d| d.native_index == device_index)
                .map_or(device_index, |d| d.stable_id);
            log::warn!("Stream for device {} reported: {}", device_id, reason);
            self.notify_error(Some(device_id), &CaptureError::StreamFailed { device_id, reason });
        }
    }

    /// Run one health check now, regardless of the interval.
    pub fn health_tick(&mut self, now: Instant) -> Vec<RecoveryOutcome> {
        let outcomes = self
            .health
            .tick(now, &mut self.controller, &self.registry, self.config.audio_format);
        for (device_id, result) in &outcomes {
            match result {
                Ok(()) => {
                    if let Some(delegate) = &self.delegate {
                        delegate.on_device_recovered(*device_id);
                    }
                }
                Err(e) => self.notify_error(Some(*device_id), e),
            }
        }
        outcomes
    }

    // -- observation --

    pub fn meter(&self, device_id: i32) -> Option<&DeviceMeter> {
        self.controller.meter(device_id)
    }

    pub fn diagnostics(&self, device_id: i32) -> DeviceDiagnostics {
        DeviceDiagnostics {
            bytes_written: self.queue.bytes_written(device_id),
            ..self.controller.diagnostics(device_id)
        }
    }

    /// Buffers waiting for the writer thread.
    pub fn writer_backlog(&self) -> usize {
        self.queue.backlog()
    }

    pub fn open_stream_count(&self) -> usize {
        self.controller.open_stream_count()
    }

    pub fn live_callback_contexts(&self) -> usize {
        self.controller.live_callback_contexts()
    }

    pub fn backend(&self) -> &B {
        self.controller.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.controller.backend_mut()
    }

    fn acquire_directory(&mut self) -> Result<PathBuf, CaptureError> {
        let directory = self.directory.as_mut().ok_or(CaptureError::DirectoryUnavailable)?;
        if !directory.acquire() {
            log::error!("Export directory access was denied");
            return Err(CaptureError::DirectoryUnavailable);
        }
        match directory.resolve() {
            Some(path) => Ok(path),
            None => {
                directory.release();
                Err(CaptureError::DirectoryUnavailable)
            }
        }
    }

    fn release_directory(&mut self) {
        if let Some(directory) = self.directory.as_mut() {
            directory.release();
        }
    }

    fn finish_recording(&mut self) {
        self.release_directory();
        self.state = RecordingState::Idle;
        self.recording_started = None;
    }

    /// `<label or device_<id>>_recording.wav`, unique within one recording.
    fn file_name(&self, device_id: i32, used: &mut HashSet<String>) -> String {
        let stem = match self.labels.get(&device_id) {
            Some(label) => sanitize_label(label),
            None => format!("device_{}", device_id),
        };
        let mut name = format!("{}_recording.{}", stem, OutputFormat::Wav.extension());
        if !used.insert(name.clone()) {
            name = format!("{}_{}_recording.{}", stem, device_id, OutputFormat::Wav.extension());
            used.insert(name.clone());
        }
        name
    }

    fn complete_file(
        &mut self,
        device_id: i32,
        finalized: Result<FinalizedFile, CaptureError>,
    ) -> DeviceRecordingOutcome {
        let file = match finalized {
            Ok(file) => file,
            Err(e) => {
                self.notify_error(Some(device_id), &e);
                return DeviceRecordingOutcome {
                    device_id,
                    result: Err(e),
                    fallback_path: None,
                };
            }
        };

        let output_format = self.config.output_format;
        let file_path = match self.converter.convert(&file.path, output_format) {
            Ok(path) => path,
            Err(e) => {
                self.notify_error(Some(device_id), &e);
                return DeviceRecordingOutcome {
                    device_id,
                    result: Err(e),
                    fallback_path: Some(file.path),
                };
            }
        };

        let result = RecordingResult {
            device_id,
            file_path,
            duration_secs: duration_of(file.data_bytes, self.config.audio_format),
            data_bytes: file.data_bytes,
            checksum: file.checksum,
            output_format,
        };
        if self.config.write_metadata_sidecar {
            self.write_sidecar(&result);
        }
        DeviceRecordingOutcome {
            device_id,
            result: Ok(result),
            fallback_path: None,
        }
    }

    fn write_sidecar(&self, result: &RecordingResult) {
        let device_name = self
            .labels
            .get(&result.device_id)
            .cloned()
            .or_else(|| self.registry.descriptor(result.device_id).map(|d| d.name.clone()))
            .unwrap_or_else(|| format!("device_{}", result.device_id));
        let meta = RecordingMetadata::for_result(result, &device_name, self.config.audio_format);
        if let Err(e) = metadata::write_metadata(&meta, Path::new(&result.file_path)) {
            log::warn!("Failed to write metadata for device {}: {}", result.device_id, e);
        }
    }

    fn notify_error(&self, device_id: Option<i32>, error: &CaptureError) {
        if let Some(delegate) = &self.delegate {
            delegate.on_error(device_id, error);
        }
    }
}

impl<B: AudioBackend> Drop for MultiCaptureEngine<B> {
    fn drop(&mut self) {
        self.controller.stop_all();
        if self.state.is_recording() {
            if let Err(e) = self.stop_recording() {
                log::error!("Failed to finalize recording on shutdown: {}", e);
            }
        }
        self.controller.backend_mut().terminate();
    }
}

fn sanitize_label(label: &str) -> String {
    label.trim().replace(['/', '\\'], "_")
}

fn duration_of(data_bytes: u64, format: AudioFormat) -> f64 {
    let bytes_per_second = format.bytes_per_sample() as u64 * SAMPLE_RATE as u64 * CHANNELS as u64;
    data_bytes as f64 / bytes_per_second as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::wav_format::parse_wav_header;
    use crate::session::mock_backend::{MockBackend, MockDevice};
    use crate::storage::metadata::read_metadata;
    use crate::traits::audio_backend::InputBuffer;
    use crate::traits::directory_access::FixedDirectory;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::fs;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingDelegate {
        levels: Mutex<Vec<i32>>,
        recovered: Mutex<Vec<i32>>,
        errors: Mutex<Vec<(Option<i32>, CaptureError)>>,
        finished: Mutex<usize>,
    }

    impl EngineDelegate for RecordingDelegate {
        fn on_levels_updated(&self, device_id: i32, _meter: &DeviceMeter) {
            self.levels.lock().push(device_id);
        }

        fn on_device_recovered(&self, device_id: i32) {
            self.recovered.lock().push(device_id);
        }

        fn on_error(&self, device_id: Option<i32>, error: &CaptureError) {
            self.errors.lock().push((device_id, error.clone()));
        }

        fn on_recording_finished(&self, _outcomes: &[DeviceRecordingOutcome]) {
            *self.finished.lock() += 1;
        }
    }

    struct CopyTranscoder;

    impl Transcoder for CopyTranscoder {
        fn convert(&mut self, source: &Path, target: OutputFormat) -> Result<PathBuf, String> {
            let output = source.with_extension(target.extension());
            fs::copy(source, &output).map_err(|e| e.to_string())?;
            Ok(output)
        }
    }

    struct RejectingTranscoder;

    impl Transcoder for RejectingTranscoder {
        fn convert(&mut self, _source: &Path, _target: OutputFormat) -> Result<PathBuf, String> {
            Err("encoder missing".into())
        }
    }

    fn engine(mics: usize) -> MultiCaptureEngine<MockBackend> {
        engine_with(mics, EngineConfiguration::default())
    }

    fn engine_with(mics: usize, config: EngineConfiguration) -> MultiCaptureEngine<MockBackend> {
        let devices = (0..mics).map(|i| MockDevice::input(&format!("Mic {}", i), 1)).collect();
        MultiCaptureEngine::new(MockBackend::new(devices), config).unwrap()
    }

    fn feed_int16(engine: &mut MultiCaptureEngine<MockBackend>, device: i32, samples: &[i16]) {
        for chunk in samples.chunks(256) {
            engine.backend_mut().fire(device, Some(InputBuffer::Int16(chunk)));
        }
    }

    #[test]
    fn start_then_stop_leaves_no_streams_or_contexts() {
        let mut engine = engine(3);
        for id in 0..3 {
            engine.start_device(id).unwrap();
        }
        assert_eq!(engine.open_stream_count(), 3);
        assert_eq!(engine.live_callback_contexts(), 3);

        for id in 0..3 {
            assert!(engine.stop_device(id));
        }
        assert_eq!(engine.backend().open_stream_count(), 0);
        assert_eq!(engine.live_callback_contexts(), 0);
    }

    #[test]
    fn two_devices_record_one_second_of_int16() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(2);
        assert_eq!(engine.devices().iter().map(|d| d.stable_id).collect::<Vec<_>>(), vec![0, 1]);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();
        engine.start_device(1).unwrap();

        assert_eq!(engine.start_recording().unwrap(), vec![0, 1]);
        let second: Vec<i16> = (0..44_100).map(|i| ((i % 2000) - 1000) as i16).collect();
        feed_int16(&mut engine, 0, &second);
        feed_int16(&mut engine, 1, &second);

        let outcomes = engine.stop_recording().unwrap();
        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            let result = outcome.result.as_ref().unwrap();
            assert_eq!(result.data_bytes, 88_200);
            assert_relative_eq!(result.duration_secs, 1.0);

            let bytes = fs::read(&result.file_path).unwrap();
            let header = parse_wav_header(&bytes).unwrap();
            assert_eq!(header.data_size, 88_200);
            assert_eq!(header.file_size, 88_200 + 36);
            assert_eq!(header.format_code, 1);
            assert_eq!(header.bits_per_sample, 16);

            let mut reader = hound::WavReader::open(&result.file_path).unwrap();
            let read: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
            assert_eq!(read, second);
        }
        assert_eq!(
            outcomes[0].result.as_ref().unwrap().file_path,
            dir.path().join("device_0_recording.wav")
        );
        assert!(engine.recording_state().is_idle());
        assert_eq!(engine.diagnostics(1).bytes_written, 88_200);
    }

    #[test]
    fn only_recording_devices_get_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(2);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(1).unwrap();
        engine.start_recording().unwrap();

        // Selected after recording started: streams but is not recorded.
        engine.start_device(0).unwrap();
        feed_int16(&mut engine, 0, &[100; 512]);
        feed_int16(&mut engine, 1, &[100; 512]);

        let outcomes = engine.stop_recording().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].device_id, 1);
        assert!(!dir.path().join("device_0_recording.wav").exists());
    }

    #[test]
    fn gain_round_trips_through_decibels() {
        let mut engine = engine(1);
        assert_relative_eq!(engine.device_gain(0), 0.0);

        assert_relative_eq!(engine.set_device_gain(0, 6.0), 6.0);
        assert_relative_eq!(engine.gain_state(0).linear_gain, 1.9953, epsilon = 1e-4);
        assert_relative_eq!(engine.device_gain(0), 6.0, epsilon = 1e-4);

        assert_relative_eq!(engine.set_device_gain(0, 40.0), 24.0);
        assert_relative_eq!(engine.set_device_gain(0, -40.0), -24.0);
        assert_relative_eq!(engine.set_device_gain(0, f32::NAN), 0.0);
    }

    #[test]
    fn auto_gain_targets_half_scale_and_resets_peak() {
        let mut engine = engine(1);
        assert_eq!(engine.auto_gain(0), None);

        engine.start_device(0).unwrap();
        feed_int16(&mut engine, 0, &[8192, -4096, 0, 2048]);
        assert_relative_eq!(engine.peak(0), 0.25);

        let db = engine.auto_gain(0).unwrap();
        assert_relative_eq!(db, 6.0206, epsilon = 1e-3);
        assert_relative_eq!(engine.gain_state(0).linear_gain, 2.0, epsilon = 1e-4);
        assert_eq!(engine.peak(0), 0.0);
    }

    #[test]
    fn gain_is_applied_to_recorded_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(1);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();
        engine.set_device_gain(0, signal::linear_to_db(2.0));
        engine.start_recording().unwrap();
        feed_int16(&mut engine, 0, &[1000, -1000, 30000]);

        let outcomes = engine.stop_recording().unwrap();
        let path = &outcomes[0].result.as_ref().unwrap().file_path;
        let read: Vec<i16> = hound::WavReader::open(path)
            .unwrap()
            .samples::<i16>()
            .map(Result::unwrap)
            .collect();
        assert_eq!(read, vec![2000, -2000, 32767]);
    }

    #[test]
    fn poll_publishes_levels_to_the_delegate() {
        let delegate = Arc::new(RecordingDelegate::default());
        let mut engine = engine(1);
        engine.set_delegate(delegate.clone());
        engine.start_device(0).unwrap();
        feed_int16(&mut engine, 0, &[16384; 256]);

        assert!(engine.poll(Instant::now()).is_empty());
        assert_eq!(*delegate.levels.lock(), vec![0]);
        let meter = engine.meter(0).unwrap();
        assert_relative_eq!(meter.smoothed_rms, 1.0);
        assert_relative_eq!(meter.peak, 0.5);
        assert_eq!(meter.waveform.len(), 100);
        assert_eq!(meter.activity_count, 1);
    }

    #[test]
    fn poll_reports_stream_errors_once() {
        let delegate = Arc::new(RecordingDelegate::default());
        let mut engine = engine(2);
        engine.set_delegate(delegate.clone());
        engine.start_device(1).unwrap();
        engine.backend_mut().stream_errors.push((1, "device unplugged".into()));

        engine.poll(Instant::now());
        engine.poll(Instant::now());
        let errors = delegate.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            (
                Some(1),
                CaptureError::StreamFailed {
                    device_id: 1,
                    reason: "device unplugged".into()
                }
            )
        );
    }

    #[test]
    fn poll_recovers_stalled_devices() {
        let delegate = Arc::new(RecordingDelegate::default());
        let mut engine = engine(2);
        engine.set_delegate(delegate.clone());
        engine.start_device(0).unwrap();
        engine.start_device(1).unwrap();
        feed_int16(&mut engine, 0, &[1; 256]);
        feed_int16(&mut engine, 1, &[1; 256]);

        let outcomes = engine.poll(Instant::now() + Duration::from_secs(11));
        assert_eq!(outcomes.len(), 2);
        assert_eq!(*delegate.recovered.lock(), vec![0, 1]);
        assert_eq!(engine.diagnostics(0).recoveries, 1);
        assert_eq!(engine.active_devices(), vec![0, 1]);
        assert_eq!(engine.open_stream_count(), 2);
        assert_eq!(engine.live_callback_contexts(), 2);
    }

    #[test]
    fn health_ignores_devices_with_recent_activity() {
        let mut engine = engine(1);
        engine.start_device(0).unwrap();
        feed_int16(&mut engine, 0, &[1; 256]);
        assert!(engine.health_tick(Instant::now() + Duration::from_secs(9)).is_empty());
        assert_eq!(engine.backend().opens, 1);
    }

    #[test]
    fn recording_survives_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(1);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();
        engine.start_recording().unwrap();
        feed_int16(&mut engine, 0, &[7; 256]);

        let outcomes = engine.health_tick(Instant::now() + Duration::from_secs(11));
        assert!(outcomes[0].1.is_ok());
        feed_int16(&mut engine, 0, &[7; 256]);

        let outcomes = engine.stop_recording().unwrap();
        assert_eq!(outcomes[0].result.as_ref().unwrap().data_bytes, 1024);
    }

    #[test]
    fn refresh_is_idempotent_and_clears_selection() {
        let mut engine = engine(2);
        engine.start_device(0).unwrap();
        let before = engine.devices().to_vec();

        let after = engine.refresh_devices().unwrap();
        assert_eq!(before, after);
        assert!(engine.active_devices().is_empty());
        assert_eq!(engine.live_callback_contexts(), 0);
        engine.start_device(1).unwrap();
    }

    #[test]
    fn refresh_is_refused_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(1);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();
        engine.start_recording().unwrap();
        assert_eq!(engine.refresh_devices().unwrap_err(), CaptureError::RecordingInProgress);
        assert_eq!(
            engine.set_audio_format(AudioFormat::Float32).unwrap_err(),
            CaptureError::RecordingInProgress
        );
        engine.stop_recording().unwrap();
    }

    #[test]
    fn failed_refresh_blocks_new_starts() {
        let mut engine = engine(1);
        engine.backend_mut().fail_initialize = true;
        assert!(engine.refresh_devices().is_err());
        assert!(engine.devices().is_empty());
        assert!(matches!(engine.start_device(0), Err(CaptureError::BackendUnavailable(_))));

        engine.backend_mut().fail_initialize = false;
        engine.refresh_devices().unwrap();
        engine.start_device(0).unwrap();
    }

    #[test]
    fn failed_initialization_is_not_fatal() {
        let mut backend = MockBackend::new(vec![MockDevice::input("A", 1)]);
        backend.fail_initialize = true;
        let engine = MultiCaptureEngine::new(backend, EngineConfiguration::default()).unwrap();
        assert!(engine.devices().is_empty());
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut engine = engine(1);
        assert_eq!(engine.start_device(5).unwrap_err(), CaptureError::DeviceNotAvailable(5));
        assert!(engine.active_devices().is_empty());
    }

    #[test]
    fn start_recording_preconditions() {
        let mut engine = engine(1);
        assert!(matches!(engine.start_recording(), Err(CaptureError::ConfigurationFailed(_))));
        engine.start_device(0).unwrap();
        assert_eq!(engine.start_recording().unwrap_err(), CaptureError::DirectoryUnavailable);
        assert_eq!(engine.stop_recording().unwrap_err(), CaptureError::NotRecording);

        let missing = tempfile::tempdir().unwrap().path().join("gone");
        engine.set_directory_access(Box::new(FixedDirectory::new(missing)));
        assert_eq!(engine.start_recording().unwrap_err(), CaptureError::DirectoryUnavailable);
        assert!(engine.recording_state().is_idle());
    }

    #[test]
    fn labels_name_the_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(3);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.set_device_label(0, "Lead/Vox");
        engine.set_device_label(1, "Room");
        engine.set_device_label(2, "Room");
        for id in 0..3 {
            engine.start_device(id).unwrap();
        }
        engine.start_recording().unwrap();
        engine.stop_recording().unwrap();

        assert!(dir.path().join("Lead_Vox_recording.wav").exists());
        assert!(dir.path().join("Room_recording.wav").exists());
        assert!(dir.path().join("Room_2_recording.wav").exists());
    }

    #[test]
    fn float32_recording_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfiguration {
            audio_format: AudioFormat::Float32,
            ..EngineConfiguration::default()
        };
        let mut engine = engine_with(1, config);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();
        assert_eq!(engine.backend().stream_for(0).unwrap().params.format, AudioFormat::Float32);
        engine.start_recording().unwrap();

        let samples = [0.125f32, -0.5, 0.999, -1.0];
        engine.backend_mut().fire(0, Some(InputBuffer::Float32(&samples)));
        let outcomes = engine.stop_recording().unwrap();

        let path = &outcomes[0].result.as_ref().unwrap().file_path;
        let mut reader = hound::WavReader::open(path).unwrap();
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        let read: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn changing_format_reopens_active_streams() {
        let mut engine = engine(1);
        engine.start_device(0).unwrap();
        engine.set_audio_format(AudioFormat::Float32).unwrap();
        assert_eq!(engine.backend().opens, 2);
        assert_eq!(engine.backend().stream_for(0).unwrap().params.format, AudioFormat::Float32);
        assert_eq!(engine.live_callback_contexts(), 1);
    }

    #[test]
    fn conversion_replaces_the_wav() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(1);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.set_transcoder(Box::new(CopyTranscoder));
        engine.set_output_format(OutputFormat::Flac);
        engine.start_device(0).unwrap();
        engine.start_recording().unwrap();
        feed_int16(&mut engine, 0, &[3; 256]);

        let outcomes = engine.stop_recording().unwrap();
        let result = outcomes[0].result.as_ref().unwrap();
        assert_eq!(result.file_path, dir.path().join("device_0_recording.flac"));
        assert_eq!(result.output_format, OutputFormat::Flac);
        assert!(!dir.path().join("device_0_recording.wav").exists());
    }

    #[test]
    fn conversion_failure_keeps_the_wav() {
        let dir = tempfile::tempdir().unwrap();
        let delegate = Arc::new(RecordingDelegate::default());
        let mut engine = engine(1);
        engine.set_delegate(delegate.clone());
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.set_transcoder(Box::new(RejectingTranscoder));
        engine.set_output_format(OutputFormat::Mp3);
        engine.start_device(0).unwrap();
        engine.start_recording().unwrap();

        let outcomes = engine.stop_recording().unwrap();
        assert_eq!(
            outcomes[0].result,
            Err(CaptureError::ConversionFailed("encoder missing".into()))
        );
        let fallback = outcomes[0].fallback_path.as_ref().unwrap();
        assert!(fallback.exists());
        assert_eq!(delegate.errors.lock().len(), 1);
        assert_eq!(*delegate.finished.lock(), 1);
    }

    #[test]
    fn sidecar_metadata_is_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfiguration {
            write_metadata_sidecar: true,
            ..EngineConfiguration::default()
        };
        let mut engine = engine_with(1, config);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();
        engine.start_recording().unwrap();
        feed_int16(&mut engine, 0, &[5; 441]);

        let outcomes = engine.stop_recording().unwrap();
        let result = outcomes[0].result.as_ref().unwrap();
        let meta = read_metadata(&result.file_path).unwrap();
        assert_eq!(meta.device_name, "Mic 0");
        assert_eq!(meta.checksum, result.checksum);
        assert_eq!(meta.sample_rate, 44_100);
        assert_relative_eq!(meta.duration_secs, 0.01);
    }

    #[test]
    fn consecutive_recordings_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(1);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();

        engine.start_recording().unwrap();
        feed_int16(&mut engine, 0, &[1; 1000]);
        let first = engine.stop_recording().unwrap();
        assert_eq!(first[0].result.as_ref().unwrap().data_bytes, 2000);

        engine.start_recording().unwrap();
        feed_int16(&mut engine, 0, &[2; 10]);
        let second = engine.stop_recording().unwrap();
        assert_eq!(second[0].result.as_ref().unwrap().data_bytes, 20);
    }

    #[test]
    fn stale_buffers_never_reach_the_next_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(1);
        engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
        engine.start_device(0).unwrap();

        engine.start_recording().unwrap();
        let first_session = engine.recording_session;
        feed_int16(&mut engine, 0, &[4; 10]);
        let sender = engine.queue.append_sender();
        let first = engine.stop_recording().unwrap();
        assert_eq!(first[0].result.as_ref().unwrap().data_bytes, 20);

        engine.start_recording().unwrap();
        assert_ne!(engine.recording_session, first_session);
        // A callback that read the first session's stamp just before stop.
        sender.submit(0, first_session, vec![0.5; 10]);
        let second = engine.stop_recording().unwrap();
        assert_eq!(second[0].result.as_ref().unwrap().data_bytes, 0);
    }

    #[test]
    fn drop_finalizes_an_open_recording() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut engine = engine(1);
            engine.set_directory_access(Box::new(FixedDirectory::new(dir.path())));
            engine.start_device(0).unwrap();
            engine.start_recording().unwrap();
            feed_int16(&mut engine, 0, &[9; 100]);
        }
        let bytes = fs::read(dir.path().join("device_0_recording.wav")).unwrap();
        assert_eq!(parse_wav_header(&bytes).unwrap().data_size, 200);
    }
}
