//! Processing context: graph, bridges, and native session.

use core::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rtrb::Producer;

use crate::bridge::{CaptureBridge, CaptureInner, RenderBridge, RenderInner};
use crate::config::ContextConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::glitch::{GlitchReporter, GlitchSnapshot};
use crate::graph::{is_audio_thread, AudioGraph};
use crate::host::{HostSession, NativeHost};
use crate::node::{AudioNode, GraphNode, NodeId};
use crate::nodes::OutputNode;

/// A handle for sending messages to a node in the graph.
///
/// Returned by [`Context::add`]. Pass it to [`Context::connect`] or
/// [`Context::output`] to route audio, and use [`send`](Handle::send) for
/// parameter updates.
pub struct Handle<M: Send + 'static> {
    node_id: NodeId,
    sender: Producer<M>,
    _marker: PhantomData<M>,
}

impl<M: Send + 'static> Handle<M> {
    /// Queue a message for the node; it is applied at the start of the next
    /// graph pass. Lock-free.
    ///
    /// Returns `Err(msg)` if the queue is full.
    pub fn send(&mut self, msg: M) -> core::result::Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }
}

impl<M: Send + 'static> GraphNode for Handle<M> {
    fn node_id(&self) -> NodeId {
        self.node_id
    }
}

enum BridgeEntry {
    Render(Weak<RenderInner>),
    Capture(Weak<CaptureInner>),
}

impl BridgeEntry {
    fn is_alive(&self) -> bool {
        match self {
            BridgeEntry::Render(weak) => weak.strong_count() > 0,
            BridgeEntry::Capture(weak) => weak.strong_count() > 0,
        }
    }
}

/// State shared between the context, its bridges, and the render callback.
pub(crate) struct ContextShared {
    pub(crate) config: ContextConfig,
    /// The processing lock. `None` once the context is torn down.
    pub(crate) graph: Mutex<Option<AudioGraph>>,
    pub(crate) glitches: GlitchReporter,
    registry: Mutex<Vec<BridgeEntry>>,
    session: Mutex<Option<Arc<HostSession>>>,
}

impl ContextShared {
    pub(crate) fn session(&self) -> Result<Arc<HostSession>> {
        self.session.lock().clone().ok_or(Error::ContextDropped)
    }

    pub(crate) fn add_node<N: AudioNode>(&self, node: N) -> Result<(NodeId, Producer<N::Message>)> {
        debug_assert!(!is_audio_thread(), "graph mutated from the audio thread");
        let mut graph = self.graph.lock();
        let graph = graph.as_mut().ok_or(Error::ContextDropped)?;
        Ok(graph.add(node, self.config.message_queue_size))
    }

    fn register(&self, entry: BridgeEntry) {
        let mut registry = self.registry.lock();
        registry.retain(BridgeEntry::is_alive);
        registry.push(entry);
    }

    /// Live render bridge for this device, if any.
    pub(crate) fn render_on(&self, device: &Device) -> Option<Arc<RenderInner>> {
        let registry = self.registry.lock();
        registry.iter().find_map(|entry| match entry {
            BridgeEntry::Render(weak) => weak.upgrade().filter(|r| r.device().same_endpoint(device)),
            BridgeEntry::Capture(_) => None,
        })
    }

    /// Live capture bridges for this device.
    pub(crate) fn captures_on(&self, device: &Device) -> Vec<Arc<CaptureInner>> {
        let registry = self.registry.lock();
        registry
            .iter()
            .filter_map(|entry| match entry {
                BridgeEntry::Capture(weak) => weak.upgrade().filter(|c| c.device().same_endpoint(device)),
                BridgeEntry::Render(_) => None,
            })
            .collect()
    }

    fn snapshot(&self) -> (Vec<Arc<CaptureInner>>, Vec<Arc<RenderInner>>) {
        let registry = self.registry.lock();
        let mut captures = Vec::new();
        let mut renders = Vec::new();
        for entry in registry.iter() {
            match entry {
                BridgeEntry::Capture(weak) => captures.extend(weak.upgrade()),
                BridgeEntry::Render(weak) => renders.extend(weak.upgrade()),
            }
        }
        (captures, renders)
    }
}

/// The processing context.
///
/// Owns the graph, the native host session, and the registry of device
/// bridges. The graph runs inside the output bridge's hardware callback;
/// everything else here is called from control threads.
///
/// # Example
///
/// ```
/// use klangport::host::MockHost;
/// use klangport::{Context, ContextConfig, Device};
///
/// let speakers = Device::new("0 - Mock - Speakers", "Speakers").with_output_channels(2);
/// let host = MockHost::with_devices(vec![speakers.clone()]);
///
/// let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
/// context.create_render_bridge(&speakers);
/// context.enable().unwrap();
///
/// let block = host.run_output_cycle(&speakers.key, &[]).unwrap();
/// assert_eq!(block.len(), 512 * 2);
/// ```
///
/// # Teardown
///
/// Dropping the context disables and uninitializes every live bridge,
/// captures first, then tears the graph down so a late callback outputs
/// silence, and finally releases the host session.
pub struct Context {
    shared: Arc<ContextShared>,
    output_node: NodeId,
    output: Mutex<Option<RenderBridge>>,
    last_report: Mutex<GlitchSnapshot>,
}

impl Context {
    /// Create a context on `host`. Initializes the native layer.
    pub fn new<H: NativeHost + 'static>(host: H, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let session = HostSession::acquire(Arc::new(host))?;

        let mut graph = AudioGraph::new(config.sample_rate);
        let (output_node, _) = graph.add(OutputNode::new(config.channels), 1);
        graph.set_terminal(output_node);

        tracing::info!(
            sample_rate = config.sample_rate,
            frames = config.frames_per_block,
            channels = config.channels,
            "created processing context"
        );

        Ok(Self {
            shared: Arc::new(ContextShared {
                config,
                graph: Mutex::new(Some(graph)),
                glitches: GlitchReporter::new(),
                registry: Mutex::new(Vec::new()),
                session: Mutex::new(Some(session)),
            }),
            output_node,
            output: Mutex::new(None),
            last_report: Mutex::new(GlitchSnapshot::default()),
        })
    }

    /// Create a context matched to the host's default output device, with a
    /// render bridge for it set as the output.
    pub fn default_output<H: NativeHost + 'static>(host: H) -> Result<Self> {
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceNotFound("default output".into()))?;
        let context = Self::new(host, ContextConfig::for_device(&device))?;
        context.create_render_bridge(&device);
        Ok(context)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.shared.config
    }

    /// Devices known to the host.
    pub fn devices(&self) -> Vec<Device> {
        self.shared
            .session()
            .map(|session| session.host().devices())
            .unwrap_or_default()
    }

    /// Add a node to the graph.
    pub fn add<N: AudioNode>(&self, node: N) -> Result<Handle<N::Message>> {
        let (node_id, sender) = self.shared.add_node(node)?;
        Ok(Handle {
            node_id,
            sender,
            _marker: PhantomData,
        })
    }

    /// Route the output of `from` into `to`.
    pub fn connect(&self, from: &impl GraphNode, to: &impl GraphNode) -> Result<()> {
        debug_assert!(!is_audio_thread(), "graph mutated from the audio thread");
        let mut graph = self.shared.graph.lock();
        let graph = graph.as_mut().ok_or(Error::ContextDropped)?;
        if !graph.contains(from.node_id()) {
            return Err(Error::UnknownNode(from.node_id()));
        }
        if !graph.connect(from.node_id(), to.node_id()) {
            return Err(Error::UnknownNode(to.node_id()));
        }
        Ok(())
    }

    /// Route a node to the context output.
    pub fn output(&self, node: &impl GraphNode) -> Result<()> {
        self.connect(node, &self.output_node)
    }

    /// Create a render bridge for `device` and make it the context output.
    ///
    /// A previous output bridge is uninitialized.
    pub fn create_render_bridge(&self, device: &Device) -> RenderBridge {
        let bridge = RenderBridge::create(&self.shared, device);
        self.shared
            .register(BridgeEntry::Render(Arc::downgrade(bridge.inner())));
        if let Some(previous) = self.output.lock().replace(bridge.clone()) {
            previous.uninitialize();
        }
        bridge
    }

    /// Create a capture bridge using every input channel of `device`.
    pub fn create_capture_bridge(&self, device: &Device) -> Result<CaptureBridge> {
        self.create_capture_bridge_with_channels(device, device.input_channels)
    }

    pub fn create_capture_bridge_with_channels(&self, device: &Device, channels: usize) -> Result<CaptureBridge> {
        let bridge = CaptureBridge::create(&self.shared, device, channels)?;
        self.shared
            .register(BridgeEntry::Capture(Arc::downgrade(bridge.inner())));
        Ok(bridge)
    }

    pub fn output_bridge(&self) -> Option<RenderBridge> {
        self.output.lock().clone()
    }

    /// Initialize and start the output bridge.
    pub fn enable(&self) -> Result<()> {
        let bridge = self.output_bridge().ok_or(Error::NoOutput)?;
        bridge.initialize()?;
        bridge.enable_processing()
    }

    /// Stop the output bridge.
    pub fn disable(&self) -> Result<()> {
        match self.output_bridge() {
            Some(bridge) => bridge.disable_processing(),
            None => Ok(()),
        }
    }

    /// Frames rendered since the context was created.
    pub fn frames_processed(&self) -> u64 {
        self.shared
            .graph
            .lock()
            .as_ref()
            .map_or(0, AudioGraph::frames_processed)
    }

    pub fn glitches(&self) -> GlitchSnapshot {
        self.shared.glitches.snapshot()
    }

    /// Log glitches that happened since the previous report and return them.
    ///
    /// Call this from a control thread; the audio thread only counts.
    pub fn report_glitches(&self) -> GlitchSnapshot {
        let glitches = &self.shared.glitches;
        // Clear every flag; a clear set means the counters have not moved.
        let flagged = glitches.check_underrun() | glitches.check_overrun() | glitches.check_clip();
        if !flagged {
            return GlitchSnapshot::default();
        }

        let now = glitches.snapshot();
        let mut last = self.last_report.lock();
        let delta = now.since(&last);
        if !delta.is_clean() {
            tracing::warn!(
                underruns = delta.underruns,
                overruns = delta.overruns,
                clips = delta.clips,
                "audio glitches"
            );
        }
        *last = now;
        delta
    }

    /// Native streams currently open.
    pub fn live_streams(&self) -> usize {
        self.shared.session().map_or(0, |session| session.live_streams())
    }

    /// Whether the calling thread is running a graph pass.
    pub fn is_audio_thread() -> bool {
        is_audio_thread()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let (captures, renders) = self.shared.snapshot();
        for capture in captures {
            capture.uninitialize();
        }
        for render in renders {
            render.uninitialize();
        }
        self.output.lock().take();

        // A callback racing the teardown sees `None` and outputs silence.
        self.shared.graph.lock().take();
        self.shared.session.lock().take();
        tracing::info!("processing context torn down");
    }
}
