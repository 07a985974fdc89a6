use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::audio_models::{
    AudioFormat, DeviceDescriptor, DeviceDiagnostics, DeviceMeter, GainState,
};
use crate::models::config::{CHANNELS, FRAMES_PER_BUFFER, SAMPLE_RATE};
use crate::models::error::CaptureError;
use crate::session::callback::{
    CallbackContext, CallbackProcessor, DeviceSlot, EngineShared, MeterUpdate,
};
use crate::traits::audio_backend::{
    AudioBackend, InputBuffer, InputCallback, StreamHandle, StreamParameters,
};

/// One open native stream. Owned exclusively by the controller.
pub(crate) struct CaptureSession {
    pub(crate) handle: StreamHandle,
    pub(crate) generation: u64,
    pub(crate) slot: Arc<DeviceSlot>,
    pub(crate) opened_at: Instant,
    /// Set once the health monitor has excused a session with no activity.
    pub(crate) grace_used: bool,
}

/// Owns the open/start/stop lifecycle of one native stream per device.
///
/// All methods run on the controlling thread; `&mut self` serializes them.
pub struct StreamController<B: AudioBackend> {
    backend: B,
    shared: Arc<EngineShared>,
    sessions: HashMap<i32, CaptureSession>,
    active: BTreeSet<i32>,
    slots: HashMap<i32, Arc<DeviceSlot>>,
    meters: HashMap<i32, DeviceMeter>,
    live_contexts: Arc<AtomicUsize>,
    next_generation: u64,
}

impl<B: AudioBackend> StreamController<B> {
    pub(crate) fn new(backend: B, shared: Arc<EngineShared>) -> Self {
        Self {
            backend,
            shared,
            sessions: HashMap::new(),
            active: BTreeSet::new(),
            slots: HashMap::new(),
            meters: HashMap::new(),
            live_contexts: Arc::new(AtomicUsize::new(0)),
            next_generation: 1,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Open and start a fresh stream for `device`, adding it to the active set.
    ///
    /// An existing stream for the device is torn down first. On failure the
    /// device is removed from the active set and nothing stays allocated.
    pub fn start_device(
        &mut self,
        device: &DeviceDescriptor,
        format: AudioFormat,
    ) -> Result<(), CaptureError> {
        let device_id = device.stable_id;
        self.active.insert(device_id);
        if self.sessions.contains_key(&device_id) {
            log::warn!("Device {} started while running, reopening", device_id);
            self.teardown(device_id);
        }
        match self.open_session(device, format) {
            Ok(()) => {
                log::info!("Started device {} ({})", device_id, device.name);
                Ok(())
            }
            Err(e) => {
                self.active.remove(&device_id);
                log::error!("Failed to start device {}: {}", device_id, e);
                Err(e)
            }
        }
    }

    /// Stop and close the device's stream and drop its transient state.
    /// Returns whether a stream was open.
    pub fn stop_device(&mut self, device_id: i32) -> bool {
        self.active.remove(&device_id);
        let closed = self.teardown(device_id);
        if closed {
            log::info!("Stopped device {}", device_id);
        }
        closed
    }

    /// Stop every stream and clear the active set.
    pub fn stop_all(&mut self) {
        let ids: Vec<i32> = self.sessions.keys().copied().collect();
        for device_id in ids {
            self.teardown(device_id);
        }
        self.active.clear();
    }

    /// Tear down and reopen a device's stream without touching the active set.
    pub(crate) fn recover(
        &mut self,
        device: &DeviceDescriptor,
        format: AudioFormat,
    ) -> Result<(), CaptureError> {
        let device_id = device.stable_id;
        self.teardown(device_id);
        self.slot(device_id).recoveries.fetch_add(1, Ordering::Relaxed);
        self.open_session(device, format)
    }

    pub fn is_active(&self, device_id: i32) -> bool {
        self.active.contains(&device_id)
    }

    pub fn active_devices(&self) -> Vec<i32> {
        self.active.iter().copied().collect()
    }

    pub fn has_session(&self, device_id: i32) -> bool {
        self.sessions.contains_key(&device_id)
    }

    /// Streams currently open through this controller.
    pub fn open_stream_count(&self) -> usize {
        self.sessions.len()
    }

    /// Callback contexts not yet released by the backend.
    pub fn live_callback_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    pub fn meter(&self, device_id: i32) -> Option<&DeviceMeter> {
        self.meters.get(&device_id)
    }

    pub fn diagnostics(&self, device_id: i32) -> DeviceDiagnostics {
        let Some(slot) = self.slots.get(&device_id) else {
            return DeviceDiagnostics::default();
        };
        DeviceDiagnostics {
            callback_count: slot.callback_count.load(Ordering::Relaxed),
            samples_total: slot.samples_total.load(Ordering::Relaxed),
            recoveries: slot.recoveries.load(Ordering::Relaxed),
            bytes_written: 0,
        }
    }

    pub fn gain_state(&self, device_id: i32) -> GainState {
        self.slots
            .get(&device_id)
            .map(|slot| GainState {
                linear_gain: slot.gain.load(),
                peak_since_reset: slot.peak.load(),
            })
            .unwrap_or_default()
    }

    /// Replace the device's meter with a callback publication.
    ///
    /// Publications from a stream that has since been closed are ignored.
    pub(crate) fn apply_meter_update(&mut self, update: &MeterUpdate) -> Option<&DeviceMeter> {
        let current = self.sessions.get(&update.device_id)?;
        if current.generation != update.generation {
            return None;
        }
        let meter = DeviceMeter {
            smoothed_rms: update.rms,
            peak: update.peak,
            waveform: update.waveform().to_vec(),
            activity_count: update.activity_count,
        };
        self.meters.insert(update.device_id, meter);
        self.meters.get(&update.device_id)
    }

    /// Shared per-device slot, created on first use.
    pub(crate) fn slot(&mut self, device_id: i32) -> Arc<DeviceSlot> {
        Arc::clone(
            self.slots
                .entry(device_id)
                .or_insert_with(|| Arc::new(DeviceSlot::new())),
        )
    }

    pub(crate) fn session_mut(&mut self, device_id: i32) -> Option<&mut CaptureSession> {
        self.sessions.get_mut(&device_id)
    }

    pub(crate) fn shared(&self) -> &EngineShared {
        &self.shared
    }

    fn open_session(
        &mut self,
        device: &DeviceDescriptor,
        format: AudioFormat,
    ) -> Result<(), CaptureError> {
        let device_id = device.stable_id;
        let slot = self.slot(device_id);
        slot.clear_activity();

        let generation = self.next_generation;
        self.next_generation += 1;

        let ctx = CallbackContext::new(
            device_id,
            format,
            generation,
            Arc::clone(&slot),
            Arc::downgrade(&self.shared),
            Arc::clone(&self.live_contexts),
        );
        let mut processor = CallbackProcessor::new(ctx);
        let callback: InputCallback =
            Box::new(move |input: Option<InputBuffer<'_>>| processor.process(input));

        let params = StreamParameters {
            device_index: device.native_index,
            channels: CHANNELS,
            format,
            suggested_latency: device.default_low_input_latency,
            sample_rate: SAMPLE_RATE as f64,
            frames_per_buffer: FRAMES_PER_BUFFER,
            clip_off: true,
        };

        // The callback (and its context) is dropped by the backend on failure.
        let handle = self
            .backend
            .open_stream(&params, callback)
            .map_err(|e| CaptureError::StreamOpenFailed {
                device_id,
                reason: e.to_string(),
            })?;

        if let Err(e) = self.backend.start_stream(handle) {
            if let Err(close_err) = self.backend.close_stream(handle) {
                log::warn!(
                    "Failed to close unstarted stream for device {}: {}",
                    device_id,
                    close_err
                );
            }
            return Err(CaptureError::StreamStartFailed {
                device_id,
                reason: e.to_string(),
            });
        }

        self.sessions.insert(
            device_id,
            CaptureSession {
                handle,
                generation,
                slot,
                opened_at: Instant::now(),
                grace_used: false,
            },
        );
        Ok(())
    }

    /// Best-effort stop + close. Returns whether a session existed.
    fn teardown(&mut self, device_id: i32) -> bool {
        self.meters.remove(&device_id);
        let Some(session) = self.sessions.remove(&device_id) else {
            if let Some(slot) = self.slots.get(&device_id) {
                slot.clear_activity();
            }
            return false;
        };
        if let Err(e) = self.backend.stop_stream(session.handle) {
            log::warn!("Failed to stop stream for device {}: {}", device_id, e);
        }
        if let Err(e) = self.backend.close_stream(session.handle) {
            log::warn!("Failed to close stream for device {}: {}", device_id, e);
        }
        session.slot.clear_activity();
        true
    }
}

impl<B: AudioBackend> Drop for StreamController<B> {
    fn drop(&mut self) {
        self.stop_all();
    }
}
