//! Output side: one graph pass per hardware callback.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use super::capture::CaptureShared;
use super::BridgeState;
use crate::buffer::PlanarBuffer;
use crate::context::ContextShared;
use crate::device::{Device, NativeDeviceIndexLookup};
use crate::error::{Error, Result};
use crate::glitch::GlitchReporter;
use crate::host::{StreamHandle, StreamParams};

pub(crate) struct RenderCore {
    pub(crate) state: BridgeState,
    stream: Option<StreamHandle>,
    /// Captures bound to the current duplex stream.
    links: Vec<Arc<CaptureShared>>,
}

impl RenderCore {
    pub(crate) fn is_linked(&self, capture: &Arc<CaptureShared>) -> bool {
        self.links.iter().any(|link| Arc::ptr_eq(link, capture))
    }

    pub(crate) fn unlink(&mut self, capture: &Arc<CaptureShared>) {
        self.links.retain(|link| !Arc::ptr_eq(link, capture));
    }

    fn is_duplex(&self) -> bool {
        !self.links.is_empty()
    }
}

pub(crate) struct RenderInner {
    device: Device,
    context: Weak<ContextShared>,
    core: Mutex<RenderCore>,
}

/// Drives the graph from a device's output callback.
///
/// Each hardware callback pulls exactly one context block from the graph and
/// interleaves it into the driver buffer. If capture bridges exist for the
/// same device, the bridge opens a single duplex stream and hands them the
/// callback's input.
#[derive(Clone)]
pub struct RenderBridge {
    inner: Arc<RenderInner>,
}

impl RenderBridge {
    pub(crate) fn create(shared: &Arc<ContextShared>, device: &Device) -> Self {
        tracing::info!(
            device = %device.key,
            channels = shared.config.channels,
            sample_rate = shared.config.sample_rate,
            frames = shared.config.frames_per_block,
            "created render bridge"
        );
        Self {
            inner: Arc::new(RenderInner {
                device: device.clone(),
                context: Arc::downgrade(shared),
                core: Mutex::new(RenderCore {
                    state: BridgeState::Uninitialized,
                    stream: None,
                    links: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<RenderInner> {
        &self.inner
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn state(&self) -> BridgeState {
        self.inner.core.lock().state
    }

    /// Whether the bridge runs a duplex stream shared with captures.
    pub fn is_duplex(&self) -> bool {
        self.inner.core.lock().is_duplex()
    }

    /// Open the output (or duplex) stream.
    ///
    /// Capture bridges on the same device that run their own input stream
    /// are torn down first and re-initialized on the shared stream
    /// afterwards, so a device never has two streams open. If the stream
    /// fails to open they get their own streams back.
    pub fn initialize(&self) -> Result<()> {
        if self.state().is_initialized() {
            return Ok(());
        }
        let context = self.inner.context.upgrade().ok_or(Error::ContextDropped)?;

        let suspended: Vec<_> = context
            .captures_on(&self.inner.device)
            .into_iter()
            .filter_map(|capture| capture.suspend_half_duplex().map(|enabled| (capture, enabled)))
            .collect();
        drop(context);

        let result = {
            let mut core = self.inner.core.lock();
            self.inner.initialize_locked(&mut core, None)
        };

        // Without a shared stream the captures go back to their own.
        let duplex = result.is_ok();
        for (capture, was_enabled) in suspended {
            let resumed = capture.initialize_with(duplex).and_then(|_| {
                if was_enabled {
                    capture.enable_processing()
                } else {
                    Ok(())
                }
            });
            if let Err(e) = resumed {
                tracing::warn!(device = %capture.device().key, error = %e, "failed to resume capture");
            }
        }
        result
    }

    pub fn uninitialize(&self) {
        self.inner.uninitialize()
    }

    pub fn enable_processing(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        self.inner.enable_locked(&mut core)
    }

    pub fn disable_processing(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        self.inner.disable_locked(&mut core)
    }
}

impl std::fmt::Debug for RenderBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBridge")
            .field("device", &self.inner.device.key)
            .finish_non_exhaustive()
    }
}

impl RenderInner {
    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, RenderCore> {
        self.core.lock()
    }

    pub(crate) fn uninitialize(&self) {
        let mut core = self.core.lock();
        self.uninitialize_locked(&mut core);
    }

    /// Open the stream, linking every capture on the device except
    /// `exclude`.
    fn initialize_locked(&self, core: &mut RenderCore, exclude: Option<&Arc<CaptureShared>>) -> Result<()> {
        if core.state.is_initialized() {
            return Ok(());
        }
        let context = self.context.upgrade().ok_or(Error::ContextDropped)?;
        let config = &context.config;

        if config.channels > self.device.output_channels {
            return Err(Error::UnsupportedChannelCount {
                device: self.device.key.clone(),
                direction: "output",
                requested: config.channels,
                available: self.device.output_channels,
            });
        }

        let session = context.session()?;
        let index = session
            .host()
            .native_device_index(&self.device.key)
            .ok_or_else(|| Error::DeviceNotFound(self.device.key.clone()))?;

        let links: Vec<Arc<CaptureShared>> = if self.device.input_channels > 0 {
            context
                .captures_on(&self.device)
                .iter()
                .map(|capture| Arc::clone(capture.shared()))
                .filter(|shared| exclude.map_or(true, |excluded| !Arc::ptr_eq(shared, excluded)))
                .collect()
        } else {
            Vec::new()
        };
        let duplex = !links.is_empty();

        let params = StreamParams {
            device_index: index,
            input_channels: duplex.then_some(self.device.input_channels),
            output_channels: config.channels,
            sample_rate: config.sample_rate,
            frames_per_buffer: config.frames_per_block,
        };

        let mut callback = RenderCallback {
            context: Arc::downgrade(&context),
            links: links.clone(),
            working: PlanarBuffer::new(config.channels, config.frames_per_block),
            channels: config.channels,
            frames: config.frames_per_block,
            clip_threshold: config.clip_detection.then_some(config.clip_threshold),
            glitches: context.glitches.clone(),
        };
        let stream = session.open_stream(&params, Box::new(move |input, output| callback.render(input, output)))?;

        for link in &links {
            link.link().bind(config.frames_per_block, self.device.input_channels);
        }
        core.links = links;
        core.stream = Some(stream);
        core.state = BridgeState::Initialized;

        tracing::info!(
            device = %self.device.key,
            duplex,
            captures = core.links.len(),
            "render bridge initialized"
        );
        Ok(())
    }

    fn uninitialize_locked(&self, core: &mut RenderCore) {
        if !core.state.is_initialized() {
            return;
        }
        if let Err(e) = self.disable_locked(core) {
            tracing::warn!(device = %self.device.key, error = %e, "failed to stop render stream");
        }
        core.stream = None;
        for link in core.links.drain(..) {
            link.link().unbind();
        }
        core.state = BridgeState::Uninitialized;
        tracing::info!(device = %self.device.key, "render bridge uninitialized");
    }

    fn enable_locked(&self, core: &mut RenderCore) -> Result<()> {
        if !core.state.is_initialized() {
            tracing::warn!(device = %self.device.key, "enable before initialize ignored");
            return Ok(());
        }
        if let Some(stream) = core.stream.as_mut() {
            stream.start()?;
        }
        core.state = BridgeState::Enabled;
        tracing::debug!(device = %self.device.key, "render enabled");
        Ok(())
    }

    fn disable_locked(&self, core: &mut RenderCore) -> Result<()> {
        if core.state != BridgeState::Enabled {
            return Ok(());
        }
        if let Some(stream) = core.stream.as_mut() {
            stream.stop()?;
        }
        core.state = BridgeState::Disabled;
        tracing::debug!(device = %self.device.key, "render disabled");
        Ok(())
    }

    /// Reopen the stream so it links `joining`. Restores the enabled state.
    ///
    /// If the new stream cannot be opened, the stream is reopened without
    /// `joining` and the open error is returned.
    pub(crate) fn reconfigure(&self, core: &mut RenderCore, joining: &Arc<CaptureShared>) -> Result<()> {
        let was_enabled = core.state == BridgeState::Enabled;
        self.uninitialize_locked(core);
        if let Err(e) = self.initialize_locked(core, None) {
            tracing::warn!(device = %self.device.key, error = %e, "duplex reopen failed, restoring previous stream");
            let restored = self.initialize_locked(core, Some(joining)).and_then(|_| {
                if was_enabled {
                    self.enable_locked(core)
                } else {
                    Ok(())
                }
            });
            if let Err(restore) = restored {
                tracing::warn!(device = %self.device.key, error = %restore, "failed to restore render stream");
            }
            return Err(e);
        }
        if was_enabled {
            self.enable_locked(core)?;
        }
        Ok(())
    }
}

/// State owned by the hardware callback.
struct RenderCallback {
    context: Weak<ContextShared>,
    links: Vec<Arc<CaptureShared>>,
    working: PlanarBuffer,
    channels: usize,
    frames: usize,
    clip_threshold: Option<f32>,
    glitches: GlitchReporter,
}

impl RenderCallback {
    fn render(&mut self, input: &[f32], output: &mut [f32]) {
        let frames = output.len() / self.channels;
        debug_assert_eq!(frames, self.frames, "hardware block does not match the context block");
        if frames != self.frames {
            output.fill(0.0);
            return;
        }

        let Some(context) = self.context.upgrade() else {
            output.fill(0.0);
            return;
        };
        let mut guard = context.graph.lock();
        let Some(graph) = guard.as_mut() else {
            output.fill(0.0);
            return;
        };

        for link in &self.links {
            link.link().publish(input);
        }

        graph.pre_process();
        graph.pull_block(&mut self.working);
        if let Some(threshold) = self.clip_threshold {
            if self.working.peak() > threshold {
                self.working.zero();
                self.glitches.mark_clip();
            }
        }
        graph.post_process(frames);

        for link in &self.links {
            link.link().retract();
        }
        drop(guard);

        self.working.interleave_into(output, self.channels);
    }
}
