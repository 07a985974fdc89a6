//! Scripted in-memory backend for driving the engine in tests.

use std::collections::{BTreeMap, HashSet};

use crate::models::error::CaptureError;
use crate::traits::audio_backend::{
    AudioBackend, HostApiInfo, InputBuffer, InputCallback, NativeDeviceInfo, StreamHandle,
    StreamParameters,
};

pub(crate) struct MockDevice {
    pub(crate) info: Option<NativeDeviceInfo>,
}

impl MockDevice {
    pub(crate) fn input(name: &str, channels: i32) -> Self {
        Self {
            info: Some(NativeDeviceInfo {
                name: name.to_string(),
                host_api_index: 0,
                max_input_channels: channels,
                max_output_channels: 0,
                default_low_input_latency: 0.01,
                default_sample_rate: 44_100.0,
            }),
        }
    }

    pub(crate) fn output(name: &str) -> Self {
        Self {
            info: Some(NativeDeviceInfo {
                name: name.to_string(),
                host_api_index: 0,
                max_input_channels: 0,
                max_output_channels: 2,
                default_low_input_latency: 0.0,
                default_sample_rate: 48_000.0,
            }),
        }
    }

    pub(crate) fn unreadable() -> Self {
        Self { info: None }
    }
}

pub(crate) struct MockStream {
    pub(crate) params: StreamParameters,
    pub(crate) running: bool,
    callback: InputCallback,
}

pub(crate) struct MockBackend {
    pub(crate) devices: Vec<MockDevice>,
    pub(crate) fail_initialize: bool,
    pub(crate) fail_device_count: bool,
    pub(crate) fail_open: HashSet<i32>,
    pub(crate) fail_start: HashSet<i32>,
    pub(crate) initialized: bool,
    pub(crate) opens: usize,
    pub(crate) stream_errors: Vec<(i32, String)>,
    streams: BTreeMap<u64, MockStream>,
    next_handle: u64,
}

impl MockBackend {
    pub(crate) fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            fail_initialize: false,
            fail_device_count: false,
            fail_open: HashSet::new(),
            fail_start: HashSet::new(),
            initialized: true,
            opens: 0,
            stream_errors: Vec::new(),
            streams: BTreeMap::new(),
            next_handle: 1,
        }
    }

    pub(crate) fn open_stream_count(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn stream_for(&self, device_index: i32) -> Option<&MockStream> {
        self.streams.values().find(|s| s.params.device_index == device_index)
    }

    /// Deliver a buffer to every running stream of `device_index`.
    /// Returns how many callbacks ran.
    pub(crate) fn fire(&mut self, device_index: i32, buffer: Option<InputBuffer<'_>>) -> usize {
        let mut fired = 0;
        for stream in self.streams.values_mut() {
            if stream.running && stream.params.device_index == device_index {
                (stream.callback)(buffer);
                fired += 1;
            }
        }
        fired
    }
}

impl AudioBackend for MockBackend {
    fn initialize(&mut self) -> Result<(), CaptureError> {
        if self.fail_initialize {
            return Err(CaptureError::BackendUnavailable("mock init failure".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn terminate(&mut self) {
        assert!(self.streams.is_empty(), "terminate with open streams");
        self.initialized = false;
    }

    fn device_count(&self) -> Result<i32, CaptureError> {
        if self.fail_device_count || !self.initialized {
            return Err(CaptureError::BackendUnavailable("not initialized".into()));
        }
        Ok(self.devices.len() as i32)
    }

    fn device_info(&self, index: i32) -> Option<NativeDeviceInfo> {
        self.devices.get(usize::try_from(index).ok()?)?.info.clone()
    }

    fn host_api_info(&self, index: i32) -> Option<HostApiInfo> {
        (index == 0).then(|| HostApiInfo {
            name: "MockHost".into(),
        })
    }

    fn open_stream(
        &mut self,
        params: &StreamParameters,
        callback: InputCallback,
    ) -> Result<StreamHandle, CaptureError> {
        if self.fail_open.contains(&params.device_index) {
            return Err(CaptureError::Unknown("mock open failure".into()));
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.opens += 1;
        self.streams.insert(
            handle,
            MockStream {
                params: params.clone(),
                running: false,
                callback,
            },
        );
        Ok(StreamHandle(handle))
    }

    fn start_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError> {
        let stream = self
            .streams
            .get_mut(&handle.0)
            .ok_or_else(|| CaptureError::Unknown("bad handle".into()))?;
        if self.fail_start.contains(&stream.params.device_index) {
            return Err(CaptureError::Unknown("mock start failure".into()));
        }
        stream.running = true;
        Ok(())
    }

    fn stop_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError> {
        let stream = self
            .streams
            .get_mut(&handle.0)
            .ok_or_else(|| CaptureError::Unknown("bad handle".into()))?;
        stream.running = false;
        Ok(())
    }

    fn close_stream(&mut self, handle: StreamHandle) -> Result<(), CaptureError> {
        self.streams
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| CaptureError::Unknown("bad handle".into()))
    }

    fn take_stream_errors(&mut self) -> Vec<(i32, String)> {
        std::mem::take(&mut self.stream_errors)
    }
}
