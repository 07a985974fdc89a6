//! Real-time side of a capture stream.
//!
//! Everything reachable from [`CallbackProcessor::process`] is lock-free:
//! per-device state lives in atomics on a [`DeviceSlot`], samples leave
//! through non-blocking channels, and scratch buffers are preallocated.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::models::audio_models::AudioFormat;
use crate::models::config::{FRAMES_PER_BUFFER, WAVEFORM_POINTS};
use crate::processing::signal;
use crate::storage::writer_queue::AppendSender;
use crate::traits::audio_backend::InputBuffer;

/// An `f32` stored as its bit pattern.
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Raise the stored value to `value` if larger.
    pub(crate) fn fetch_max(&self, value: f32) {
        let mut current = self.0.load(Ordering::Relaxed);
        while value > f32::from_bits(current) {
            match self
                .0
                .compare_exchange_weak(
                    current,
                    value.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Per-device state shared between the controlling thread and the callback.
///
/// Gain and peak survive stream restarts; activity and throttle timestamps
/// are reset whenever a stream is torn down.
#[derive(Debug)]
pub(crate) struct DeviceSlot {
    pub(crate) gain: AtomicF32,
    pub(crate) peak: AtomicF32,
    /// Engine-clock milliseconds of the last callback, 0 = none yet.
    pub(crate) last_activity_ms: AtomicU64,
    pub(crate) last_publish_ms: AtomicU64,
    /// Recording session the device's samples belong to, 0 = not recording.
    recording_session: AtomicU64,
    pub(crate) callback_count: AtomicU64,
    pub(crate) samples_total: AtomicU64,
    pub(crate) recoveries: AtomicU64,
}

impl DeviceSlot {
    pub(crate) fn new() -> Self {
        Self {
            gain: AtomicF32::new(1.0),
            peak: AtomicF32::new(0.0),
            last_activity_ms: AtomicU64::new(0),
            last_publish_ms: AtomicU64::new(0),
            recording_session: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            samples_total: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    pub(crate) fn clear_activity(&self) {
        self.last_activity_ms.store(0, Ordering::Relaxed);
        self.last_publish_ms.store(0, Ordering::Relaxed);
    }

    pub(crate) fn recording_session(&self) -> Option<u64> {
        match self.recording_session.load(Ordering::Acquire) {
            0 => None,
            session => Some(session),
        }
    }

    /// Route samples to `session`'s file. Sessions are numbered from 1.
    pub(crate) fn begin_recording(&self, session: u64) {
        self.recording_session.store(session, Ordering::Release);
    }

    pub(crate) fn end_recording(&self) {
        self.recording_session.store(0, Ordering::Release);
    }
}

/// Engine-wide pieces a callback needs. Held strongly by the engine only.
pub(crate) struct EngineShared {
    epoch: Instant,
    meter_interval_ms: u64,
    meter_tx: Sender<MeterUpdate>,
    appends: AppendSender,
}

impl EngineShared {
    pub(crate) fn new(
        meter_interval: Duration,
        meter_tx: Sender<MeterUpdate>,
        appends: AppendSender,
    ) -> Self {
        Self {
            epoch: Instant::now(),
            meter_interval_ms: meter_interval.as_millis() as u64,
            meter_tx,
            appends,
        }
    }

    /// Milliseconds since the engine epoch, offset by one so 0 means "never".
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Convert an engine-clock stamp back to an `Instant`.
    pub(crate) fn instant_of(&self, stamp_ms: u64) -> Option<Instant> {
        (stamp_ms > 0).then(|| self.epoch + Duration::from_millis(stamp_ms - 1))
    }
}

/// Throttled meter publication from a callback to the controlling thread.
#[derive(Debug, Clone)]
pub(crate) struct MeterUpdate {
    pub(crate) device_id: i32,
    pub(crate) generation: u64,
    pub(crate) rms: f32,
    pub(crate) peak: f32,
    pub(crate) waveform: [f32; WAVEFORM_POINTS],
    pub(crate) waveform_len: usize,
    pub(crate) activity_count: u64,
}

impl MeterUpdate {
    pub(crate) fn waveform(&self) -> &[f32] {
        &self.waveform[..self.waveform_len]
    }
}

/// Per-stream callback context.
///
/// Moved into the backend's callback closure at open time, so it lives
/// exactly as long as the native stream and is dropped by `close_stream`.
/// The engine handle is weak: a callback racing engine teardown just returns.
pub(crate) struct CallbackContext {
    pub(crate) device_id: i32,
    pub(crate) format: AudioFormat,
    pub(crate) generation: u64,
    slot: Arc<DeviceSlot>,
    engine: Weak<EngineShared>,
    live: Arc<AtomicUsize>,
}

impl CallbackContext {
    pub(crate) fn new(
        device_id: i32,
        format: AudioFormat,
        generation: u64,
        slot: Arc<DeviceSlot>,
        engine: Weak<EngineShared>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            device_id,
            format,
            generation,
            slot,
            engine,
            live,
        }
    }
}

impl Drop for CallbackContext {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Processes every native buffer for one device.
pub(crate) struct CallbackProcessor {
    ctx: CallbackContext,
    decoded: Vec<f32>,
    waveform: Vec<f32>,
}

impl CallbackProcessor {
    pub(crate) fn new(ctx: CallbackContext) -> Self {
        Self {
            ctx,
            decoded: Vec::with_capacity(FRAMES_PER_BUFFER as usize * 4),
            waveform: Vec::with_capacity(WAVEFORM_POINTS),
        }
    }

    pub(crate) fn process(&mut self, input: Option<InputBuffer<'_>>) {
        let Some(input) = input else {
            return;
        };
        if input.is_empty() {
            return;
        }
        if input.format() != self.ctx.format {
            log::trace!(
                "device {}: got {:?} buffer on a {:?} stream",
                self.ctx.device_id,
                input.format(),
                self.ctx.format
            );
            return;
        }
        let Some(engine) = self.ctx.engine.upgrade() else {
            return;
        };
        let slot = &self.ctx.slot;

        let now_ms = engine.now_ms();
        slot.last_activity_ms.store(now_ms, Ordering::Relaxed);
        let activity_count = slot.callback_count.fetch_add(1, Ordering::Relaxed) + 1;
        slot.samples_total.fetch_add(input.len() as u64, Ordering::Relaxed);

        signal::decode_into(input, &mut self.decoded);
        signal::apply_gain_in_place(&mut self.decoded, slot.gain.load());

        if let Some(session) = slot.recording_session() {
            engine.appends.submit(self.ctx.device_id, session, self.decoded.clone());
        }

        let rms = signal::display_rms(&self.decoded);
        let peak = signal::peak_level(&self.decoded);
        slot.peak.fetch_max(peak);
        signal::downsample_waveform(&self.decoded, &mut self.waveform);

        let last_publish = slot.last_publish_ms.load(Ordering::Relaxed);
        if last_publish != 0 && now_ms.saturating_sub(last_publish) < engine.meter_interval_ms {
            return;
        }
        slot.last_publish_ms.store(now_ms, Ordering::Relaxed);

        let mut update = MeterUpdate {
            device_id: self.ctx.device_id,
            generation: self.ctx.generation,
            rms,
            peak,
            waveform: [0.0; WAVEFORM_POINTS],
            waveform_len: self.waveform.len(),
            activity_count,
        };
        update.waveform[..self.waveform.len()].copy_from_slice(&self.waveform);
        // Full queue means the controlling thread is behind; the next window retries.
        let _ = engine.meter_tx.try_send(update);
    }
}
