/// Recording state machine.
///
/// ```text
/// idle → recording → finalizing → idle
/// ```
///
/// Device streams run independently of this state; it only tracks whether
/// per-device files are open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording { device_ids: Vec<i32> },
    Finalizing,
}

impl RecordingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    /// Devices with an open recording file, if recording.
    pub fn recording_devices(&self) -> &[i32] {
        match self {
            Self::Recording { device_ids } => device_ids,
            _ => &[],
        }
    }
}
