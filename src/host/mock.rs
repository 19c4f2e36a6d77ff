//! Deterministic in-memory host.
//!
//! Nothing runs on its own: tests fire hardware callbacks by hand with
//! [`MockHost::run_output_cycle`] and [`MockHost::push_input`], and inspect
//! what the bridges did through [`MockHost::events`].

use std::sync::Arc;

use parking_lot::Mutex;

use super::{NativeHost, NativeStream, StreamCallback, StreamParams};
use crate::device::{Device, NativeDeviceIndexLookup};
use crate::error::{Error, Result};

/// Something a bridge asked the mock host to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Initialize,
    Open { device: String, duplex: bool },
    Start { device: String },
    Stop { device: String },
    Close { device: String },
    Terminate,
}

/// Public view of an open mock stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStreamInfo {
    pub device: String,
    pub params: StreamParams,
    pub running: bool,
}

struct Slot {
    id: u64,
    device: String,
    params: StreamParams,
    running: bool,
    callback: StreamCallback,
}

#[derive(Default)]
struct State {
    events: Vec<HostEvent>,
    slots: Vec<Slot>,
    next_id: u64,
    fail_next_open: Option<String>,
    initialized: bool,
    terminated: bool,
}

struct Inner {
    devices: Vec<Device>,
    default_output: Option<usize>,
    default_input: Option<usize>,
    state: Mutex<State>,
}

/// A host whose devices and callbacks are driven by the test.
///
/// Clones share the same state, so a test can keep one clone while the
/// context owns another.
#[derive(Clone)]
pub struct MockHost {
    inner: Arc<Inner>,
}

impl MockHost {
    /// A host with these devices. The first device with outputs is the
    /// default output, the first with inputs the default input.
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let default_output = devices.iter().position(|d| d.output_channels > 0);
        let default_input = devices.iter().position(|d| d.input_channels > 0);
        Self {
            inner: Arc::new(Inner {
                devices,
                default_output,
                default_input,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Make the next `open_stream` fail with `reason`.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.inner.state.lock().fail_next_open = Some(reason.into());
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.inner.state.lock().events.clone()
    }

    /// Open streams, oldest first.
    pub fn streams(&self) -> Vec<MockStreamInfo> {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .map(|slot| MockStreamInfo {
                device: slot.device.clone(),
                params: slot.params.clone(),
                running: slot.running,
            })
            .collect()
    }

    pub fn stream_count(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    pub fn is_initialized(&self) -> bool {
        let state = self.inner.state.lock();
        state.initialized && !state.terminated
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Fire one callback of the running stream with outputs on `device`.
    ///
    /// `input` is handed to a duplex stream as its input half; pass an empty
    /// slice to feed silence. Returns the interleaved output, or `None` if no
    /// such stream is running.
    pub fn run_output_cycle(&self, device: &str, input: &[f32]) -> Option<Vec<f32>> {
        let mut state = self.inner.state.lock();
        let slot = state
            .slots
            .iter_mut()
            .find(|s| s.running && s.device == device && s.params.output_channels > 0)?;

        let frames = slot.params.frames_per_buffer;
        let mut output = vec![0.0; frames * slot.params.output_channels];
        let silence;
        let input = match slot.params.input_channels {
            Some(channels) if input.is_empty() => {
                silence = vec![0.0; frames * channels];
                &silence[..]
            }
            Some(_) => input,
            None => &[],
        };

        // The lock stays held so a concurrent stop waits for the callback.
        (slot.callback)(input, &mut output);
        Some(output)
    }

    /// Deliver captured samples to the running input-only stream on `device`.
    ///
    /// Returns `false` if no such stream is running.
    pub fn push_input(&self, device: &str, samples: &[f32]) -> bool {
        let mut state = self.inner.state.lock();
        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|s| s.running && s.device == device && s.params.output_channels == 0)
        else {
            return false;
        };
        (slot.callback)(samples, &mut []);
        true
    }

    fn set_running(&self, id: u64, running: bool) {
        let mut state = self.inner.state.lock();
        let Some(slot) = state.slots.iter_mut().find(|s| s.id == id) else {
            return;
        };
        slot.running = running;
        let device = slot.device.clone();
        state.events.push(if running {
            HostEvent::Start { device }
        } else {
            HostEvent::Stop { device }
        });
    }

    fn close(&self, id: u64) {
        let removed = {
            let mut state = self.inner.state.lock();
            let Some(pos) = state.slots.iter().position(|s| s.id == id) else {
                return;
            };
            let slot = state.slots.remove(pos);
            state.events.push(HostEvent::Close {
                device: slot.device.clone(),
            });
            slot
        };
        // The callback may own bridge state; release it outside the lock.
        drop(removed);
    }
}

impl NativeDeviceIndexLookup for MockHost {
    fn native_device_index(&self, key: &str) -> Option<usize> {
        self.inner.devices.native_device_index(key)
    }
}

impl NativeHost for MockHost {
    fn name(&self) -> &str {
        "Mock"
    }

    fn initialize(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.initialized = true;
        state.terminated = false;
        state.events.push(HostEvent::Initialize);
        Ok(())
    }

    fn terminate(&self) {
        let mut state = self.inner.state.lock();
        state.terminated = true;
        state.events.push(HostEvent::Terminate);
    }

    fn devices(&self) -> Vec<Device> {
        self.inner.devices.clone()
    }

    fn default_output_device(&self) -> Option<Device> {
        self.inner.default_output.map(|i| self.inner.devices[i].clone())
    }

    fn default_input_device(&self) -> Option<Device> {
        self.inner.default_input.map(|i| self.inner.devices[i].clone())
    }

    fn open_stream(&self, params: &StreamParams, callback: StreamCallback) -> Result<Box<dyn NativeStream>> {
        let device = self
            .inner
            .devices
            .get(params.device_index)
            .ok_or_else(|| Error::DeviceNotFound(format!("native index {}", params.device_index)))?;

        let mut state = self.inner.state.lock();
        if let Some(reason) = state.fail_next_open.take() {
            return Err(Error::StreamOpen {
                device: device.key.clone(),
                reason,
            });
        }
        if params.output_channels > device.output_channels
            || params.input_channels.unwrap_or(0) > device.input_channels
        {
            return Err(Error::StreamOpen {
                device: device.key.clone(),
                reason: "channel count exceeds device".into(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.events.push(HostEvent::Open {
            device: device.key.clone(),
            duplex: params.is_duplex(),
        });
        state.slots.push(Slot {
            id,
            device: device.key.clone(),
            params: params.clone(),
            running: false,
            callback,
        });

        Ok(Box::new(MockStream {
            host: self.clone(),
            id,
        }))
    }
}

struct MockStream {
    host: MockHost,
    id: u64,
}

impl NativeStream for MockStream {
    fn start(&mut self) -> Result<()> {
        self.host.set_running(self.id, true);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.host.set_running(self.id, false);
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.host.close(self.id);
    }
}
