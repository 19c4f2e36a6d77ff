//! Input side: hardware capture into the graph.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dasp_graph::{Buffer, Input};
use parking_lot::Mutex;
use rtrb::Producer;

use super::duplex::DuplexLink;
use super::render::RenderInner;
use super::BridgeState;
use crate::buffer::{deinterleave_channel, PlanarBuffer};
use crate::context::ContextShared;
use crate::convert::{LinearConverter, RateConverter};
use crate::device::{Device, NativeDeviceIndexLookup};
use crate::error::{Error, Result};
use crate::glitch::GlitchReporter;
use crate::host::{StreamHandle, StreamParams};
use crate::node::{AudioNode, GraphNode, NodeId, ProcessContext};
use crate::ring_buffer::{channel_ring, RingReader, RingWriter};

/// Frame counts shared by one writer/reader pair. Fresh on every
/// initialize.
#[derive(Default)]
struct FrameCounters {
    /// Frames written to every ring and not yet read.
    buffered: AtomicUsize,
    /// Frames produced since initialize, whether or not they fit.
    total_captured: AtomicU64,
}

/// State the capture node shares with its bridge.
pub(crate) struct CaptureShared {
    enabled: AtomicBool,
    link: DuplexLink,
}

impl CaptureShared {
    pub(crate) fn link(&self) -> &DuplexLink {
        &self.link
    }
}

/// Hardware-thread half of a half-duplex capture.
struct CaptureWriter {
    channels: usize,
    /// Channels per interleaved input frame; the stream carries every
    /// device channel and the writer keeps the first `channels`.
    stride: usize,
    pass_frames: usize,
    rings: Vec<RingWriter>,
    deinterleaved: PlanarBuffer,
    converter: Option<(Box<dyn RateConverter>, PlanarBuffer)>,
    counters: Arc<FrameCounters>,
    glitches: GlitchReporter,
}

impl CaptureWriter {
    /// Push one callback's interleaved input into the rings.
    fn capture_audio(&mut self, interleaved: &[f32]) {
        let Self {
            channels,
            stride,
            pass_frames,
            rings,
            deinterleaved,
            converter,
            counters,
            glitches,
        } = self;
        let (channels, stride) = (*channels, *stride);
        let total_frames = interleaved.len() / stride;

        let mut offset = 0;
        while offset < total_frames {
            let n = (total_frames - offset).min(*pass_frames);
            deinterleaved.set_frames(n);
            if stride == 1 {
                deinterleaved
                    .channel_mut(0)
                    .copy_from_slice(&interleaved[offset..offset + n]);
            } else {
                for ch in 0..channels {
                    deinterleave_channel(interleaved, stride, ch, offset, deinterleaved.channel_mut(ch));
                }
            }

            let block: &PlanarBuffer = match converter {
                Some((conv, out)) => {
                    conv.convert(deinterleaved, out);
                    out
                }
                None => deinterleaved,
            };

            let produced = block.frames();
            counters.total_captured.fetch_add(produced as u64, Ordering::Relaxed);

            // Free space only grows behind the writer's back, so a ring that
            // fits now still fits below. Either every ring takes the pass or
            // none does, keeping the channels frame-aligned.
            if rings.iter().all(|ring| ring.free() >= produced) {
                for (ch, ring) in rings.iter_mut().enumerate() {
                    if ring.write(block.channel(ch)).is_err() {
                        glitches.mark_overrun();
                    }
                }
                counters.buffered.fetch_add(produced, Ordering::Release);
            } else {
                glitches.mark_overrun();
            }
            offset += n;
        }
    }
}

/// Graph-thread half of a half-duplex capture.
pub(crate) struct CaptureReader {
    rings: Vec<RingReader>,
    counters: Arc<FrameCounters>,
    glitches: GlitchReporter,
}

impl CaptureReader {
    /// Claim `frames` for the block about to be pulled. Returns `false` if
    /// fewer are buffered; the whole block is then silent.
    fn begin_block(&mut self, frames: usize) -> bool {
        if self.counters.buffered.load(Ordering::Acquire) < frames {
            // Startup is not an underrun.
            if self.counters.total_captured.load(Ordering::Relaxed) >= frames as u64 {
                self.glitches.mark_underrun();
            }
            return false;
        }
        self.counters.buffered.fetch_sub(frames, Ordering::AcqRel);
        true
    }

    /// Read one sub-block of a claimed block into each channel.
    fn read_sub_block(&mut self, outputs: &mut [Buffer]) {
        for (ring, out) in self.rings.iter_mut().zip(outputs.iter_mut()) {
            if ring.read(&mut out[..]).is_err() {
                self.glitches.mark_underrun();
                out.iter_mut().for_each(|s| *s = 0.0);
            }
        }
    }
}

pub(crate) enum CaptureMessage {
    Attach(CaptureReader),
    Detach,
}

/// Source node that emits captured input.
///
/// Silent until its bridge is enabled and data is available. Whether a
/// block carries input is decided once, at its first sub-block.
struct CaptureNode {
    channels: usize,
    shared: Arc<CaptureShared>,
    reader: Option<CaptureReader>,
    live: bool,
}

impl AudioNode for CaptureNode {
    type Message = CaptureMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = CaptureMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                CaptureMessage::Attach(reader) => self.reader = Some(reader),
                CaptureMessage::Detach => self.reader = None,
            }
            self.live = false;
        }

        let duplex = self.shared.link.is_bound();
        if ctx.sub_block == 0 {
            self.live = self.shared.enabled.load(Ordering::Acquire)
                && (duplex
                    || self
                        .reader
                        .as_mut()
                        .is_some_and(|reader| reader.begin_block(ctx.block_frames)));
        }

        let filled = if !self.live {
            false
        } else if duplex {
            let published = self.shared.link.read_next(outputs);
            debug_assert!(published, "duplex capture pulled outside a render callback");
            published
        } else {
            match self.reader.as_mut() {
                Some(reader) => {
                    reader.read_sub_block(outputs);
                    true
                }
                None => false,
            }
        };

        if !filled {
            for out in outputs.iter_mut() {
                out.iter_mut().for_each(|s| *s = 0.0);
            }
        }
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}

struct CaptureCore {
    state: BridgeState,
    /// Own stream; `None` when uninitialized or duplexed.
    stream: Option<StreamHandle>,
    sender: Producer<CaptureMessage>,
    render: Weak<RenderInner>,
}

pub(crate) struct CaptureInner {
    device: Device,
    channels: usize,
    node: NodeId,
    shared: Arc<CaptureShared>,
    context: Weak<ContextShared>,
    core: Mutex<CaptureCore>,
}

/// Feeds a device's input into the graph.
///
/// The bridge is also a graph node: connect it like any other source.
/// Cloning yields another handle to the same bridge.
#[derive(Clone)]
pub struct CaptureBridge {
    inner: Arc<CaptureInner>,
}

impl CaptureBridge {
    /// Add the capture node to the graph. Called by the context.
    pub(crate) fn create(shared: &Arc<ContextShared>, device: &Device, channels: usize) -> Result<Self> {
        let capture_shared = Arc::new(CaptureShared {
            enabled: AtomicBool::new(false),
            link: DuplexLink::new(),
        });
        let node = CaptureNode {
            channels,
            shared: Arc::clone(&capture_shared),
            reader: None,
            live: false,
        };
        let (node, sender) = shared.add_node(node)?;

        tracing::info!(
            device = %device.key,
            channels,
            sample_rate = device.sample_rate,
            frames = device.frames_per_block,
            "created capture bridge"
        );

        Ok(Self {
            inner: Arc::new(CaptureInner {
                device: device.clone(),
                channels,
                node,
                shared: capture_shared,
                context: Arc::downgrade(shared),
                core: Mutex::new(CaptureCore {
                    state: BridgeState::Uninitialized,
                    stream: None,
                    sender,
                    render: Weak::new(),
                }),
            }),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<CaptureInner> {
        &self.inner
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn channels(&self) -> usize {
        self.inner.channels
    }

    pub fn state(&self) -> BridgeState {
        self.inner.core.lock().state
    }

    /// Whether this capture reads from a render bridge's duplex stream.
    pub fn is_duplex(&self) -> bool {
        self.inner.core.lock().render.strong_count() > 0
    }

    pub fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }

    pub fn uninitialize(&self) {
        self.inner.uninitialize()
    }

    pub fn enable_processing(&self) -> Result<()> {
        self.inner.enable_processing()
    }

    pub fn disable_processing(&self) -> Result<()> {
        self.inner.disable_processing()
    }
}

impl GraphNode for CaptureBridge {
    fn node_id(&self) -> NodeId {
        self.inner.node
    }
}

impl std::fmt::Debug for CaptureBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBridge")
            .field("device", &self.inner.device.key)
            .field("channels", &self.inner.channels)
            .finish_non_exhaustive()
    }
}

impl CaptureInner {
    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn shared(&self) -> &Arc<CaptureShared> {
        &self.shared
    }

    pub(crate) fn initialize(&self) -> Result<()> {
        self.initialize_with(true)
    }

    /// With `allow_duplex` false the bridge opens its own input stream even
    /// if a render bridge exists for the device.
    pub(crate) fn initialize_with(&self, allow_duplex: bool) -> Result<()> {
        let mut core = self.core.lock();
        if core.state.is_initialized() {
            return Ok(());
        }

        let context = self.context.upgrade().ok_or(Error::ContextDropped)?;
        if self.channels == 0 || self.channels > self.device.input_channels {
            return Err(Error::UnsupportedChannelCount {
                device: self.device.key.clone(),
                direction: "input",
                requested: self.channels,
                available: self.device.input_channels,
            });
        }

        if let Some(render) = context.render_on(&self.device).filter(|_| allow_duplex) {
            // Lock order: capture, then render.
            let mut render_core = render.lock_core();
            if render_core.state.is_initialized() && !render_core.is_linked(&self.shared) {
                tracing::info!(device = %self.device.key, "reconfiguring render bridge for duplex");
                render.reconfigure(&mut render_core, &self.shared)?;
            }
            drop(render_core);

            core.render = Arc::downgrade(&render);
            core.state = BridgeState::Initialized;
            tracing::info!(device = %self.device.key, "capture bridge initialized (duplex)");
            return Ok(());
        }

        let config = &context.config;
        let session = context.session()?;
        let index = session
            .host()
            .native_device_index(&self.device.key)
            .ok_or_else(|| Error::DeviceNotFound(self.device.key.clone()))?;

        let converter: Option<Box<dyn RateConverter>> = (self.device.sample_rate != config.sample_rate).then(|| {
            Box::new(LinearConverter::new(
                self.device.sample_rate,
                config.sample_rate,
                self.channels,
                self.device.frames_per_block,
            )) as Box<dyn RateConverter>
        });

        let (pass_frames, dest_max) = match &converter {
            Some(conv) => (conv.source_max_frames_per_block(), conv.dest_max_frames_per_block()),
            None => (config.frames_per_block, config.frames_per_block),
        };
        let capacity = config.frames_per_block.max(dest_max) * config.ring_padding_factor;

        let counters = Arc::new(FrameCounters::default());
        let (writers, readers): (Vec<_>, Vec<_>) = (0..self.channels).map(|_| channel_ring(capacity)).unzip();

        let mut writer = CaptureWriter {
            channels: self.channels,
            stride: self.device.input_channels,
            pass_frames,
            rings: writers,
            deinterleaved: PlanarBuffer::new(self.channels, pass_frames),
            converter: converter.map(|conv| (conv, PlanarBuffer::new(self.channels, dest_max))),
            counters: Arc::clone(&counters),
            glitches: context.glitches.clone(),
        };
        let reader = CaptureReader {
            rings: readers,
            counters,
            glitches: context.glitches.clone(),
        };

        let params = StreamParams {
            device_index: index,
            input_channels: Some(self.device.input_channels),
            output_channels: 0,
            sample_rate: self.device.sample_rate,
            frames_per_buffer: self.device.frames_per_block,
        };
        let stream = session.open_stream(&params, Box::new(move |input, _| writer.capture_audio(input)))?;

        if core.sender.push(CaptureMessage::Attach(reader)).is_err() {
            return Err(Error::ControlQueueFull);
        }

        core.stream = Some(stream);
        core.state = BridgeState::Initialized;
        tracing::info!(
            device = %self.device.key,
            channels = self.channels,
            ring_capacity = capacity,
            converting = self.device.sample_rate != config.sample_rate,
            "capture bridge initialized"
        );
        Ok(())
    }

    pub(crate) fn uninitialize(&self) {
        let mut core = self.core.lock();
        self.uninitialize_locked(&mut core);
    }

    fn uninitialize_locked(&self, core: &mut CaptureCore) {
        if !core.state.is_initialized() {
            return;
        }
        if let Err(e) = self.disable_locked(core) {
            tracing::warn!(device = %self.device.key, error = %e, "failed to stop capture stream");
        }
        core.stream = None;
        if core.sender.push(CaptureMessage::Detach).is_err() {
            tracing::warn!(device = %self.device.key, "capture node queue full; reader stays attached");
        }

        self.shared.link.unbind();
        if let Some(render) = core.render.upgrade() {
            render.lock_core().unlink(&self.shared);
        }
        core.render = Weak::new();
        core.state = BridgeState::Uninitialized;
        tracing::info!(device = %self.device.key, "capture bridge uninitialized");
    }

    /// Tear down an own (half-duplex) stream so the render bridge can take
    /// the device over. Returns whether the bridge was enabled.
    pub(crate) fn suspend_half_duplex(&self) -> Option<bool> {
        let mut core = self.core.lock();
        core.stream.as_ref()?;
        let was_enabled = core.state == BridgeState::Enabled;
        self.uninitialize_locked(&mut core);
        Some(was_enabled)
    }

    pub(crate) fn enable_processing(&self) -> Result<()> {
        let mut core = self.core.lock();
        if !core.state.is_initialized() {
            tracing::warn!(device = %self.device.key, "enable before initialize ignored");
            return Ok(());
        }
        if let Some(stream) = core.stream.as_mut() {
            stream.start()?;
        }
        self.shared.enabled.store(true, Ordering::Release);
        core.state = BridgeState::Enabled;
        tracing::debug!(device = %self.device.key, "capture enabled");
        Ok(())
    }

    pub(crate) fn disable_processing(&self) -> Result<()> {
        let mut core = self.core.lock();
        self.disable_locked(&mut core)
    }

    fn disable_locked(&self, core: &mut CaptureCore) -> Result<()> {
        if core.state != BridgeState::Enabled {
            return Ok(());
        }
        self.shared.enabled.store(false, Ordering::Release);
        if let Some(stream) = core.stream.as_mut() {
            stream.stop()?;
        }
        core.state = BridgeState::Disabled;
        tracing::debug!(device = %self.device.key, "capture disabled");
        Ok(())
    }
}
