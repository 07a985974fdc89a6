use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;
use crate::session::controller::StreamController;
use crate::session::registry::DeviceRegistry;
use crate::traits::audio_backend::AudioBackend;

/// Outcome of one recovery attempt.
pub type RecoveryOutcome = (i32, Result<(), CaptureError>);

/// Periodic liveness watchdog for active devices.
///
/// Runs on the controlling thread. A stalled device is torn down and reopened
/// in place; it never leaves the active set because of a failed recovery.
#[derive(Debug)]
pub struct HealthMonitor {
    interval: Duration,
    stall_threshold: Duration,
    last_tick: Instant,
}

impl HealthMonitor {
    pub fn new(interval: Duration, stall_threshold: Duration) -> Self {
        Self {
            interval,
            stall_threshold,
            last_tick: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_tick) >= self.interval
    }

    /// Check every active device and recover the stale ones.
    ///
    /// Returns one entry per recovery attempted, in device id order.
    pub fn tick<B: AudioBackend>(
        &mut self,
        now: Instant,
        controller: &mut StreamController<B>,
        registry: &DeviceRegistry,
        format: AudioFormat,
    ) -> Vec<RecoveryOutcome> {
        self.last_tick = now;
        let mut outcomes = Vec::new();

        for device_id in controller.active_devices() {
            let Some(reason) = self.stale_reason(now, controller, device_id) else {
                continue;
            };
            log::warn!("Device {} {}, recovering", device_id, reason);

            let result = match registry.descriptor(device_id) {
                Some(descriptor) if registry.is_ready() => controller.recover(descriptor, format),
                _ => Err(CaptureError::DeviceNotAvailable(device_id)),
            };
            match &result {
                Ok(()) => log::info!("Device {} recovered", device_id),
                Err(e) => log::error!("Recovery of device {} failed: {}", device_id, e),
            }
            outcomes.push((device_id, result));
        }
        outcomes
    }

    fn stale_reason<B: AudioBackend>(
        &self,
        now: Instant,
        controller: &mut StreamController<B>,
        device_id: i32,
    ) -> Option<&'static str> {
        let last_ms = {
            let Some(session) = controller.session_mut(device_id) else {
                return Some("has no open stream");
            };
            let last_ms = session.slot.last_activity_ms.load(Ordering::Relaxed);
            if last_ms == 0 {
                if !session.grace_used {
                    session.grace_used = true;
                    log::debug!(
                        "Device {} has no activity {:?} after open, allowing one tick",
                        device_id,
                        now.saturating_duration_since(session.opened_at)
                    );
                    return None;
                }
                return Some("never delivered audio");
            }
            last_ms
        };

        let last = controller.shared().instant_of(last_ms)?;
        (now.saturating_duration_since(last) > self.stall_threshold).then_some("stalled")
    }
}
