//! Pull graph driven by the render bridge.

use std::cell::Cell;

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::graph::NodeIndex;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::buffer::PlanarBuffer;
use crate::node::{AudioNode, NodeId, ProcessContext};

thread_local! {
    static AUDIO_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is currently running a graph pass.
pub fn is_audio_thread() -> bool {
    AUDIO_THREAD.with(|flag| flag.get())
}

// Type-erased so the graph can hold nodes with different message types.
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        let receiver = &mut self.receiver;
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        self.node.process(ctx, messages, inputs, outputs);
    }
}

struct DaspAdapter {
    node: Box<dyn ErasedNode>,
    ctx: ProcessContext,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.node.process_erased(&self.ctx, inputs, outputs);
    }
}

type InnerGraph = petgraph::graph::Graph<NodeData<DaspAdapter>, ()>;

/// Fixed-rate pull graph.
///
/// One pass pulls [`Buffer::LEN`] frames from the terminal node. The render
/// bridge runs as many passes as its hardware block needs.
pub(crate) struct AudioGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,
    node_indices: HashMap<NodeId, NodeIndex>,
    next_node_id: u32,
    terminal: Option<NodeIndex>,
    frames_processed: u64,
}

impl AudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: InnerGraph::with_capacity(64, 64),
            processor: Processor::with_capacity(64),
            ctx: ProcessContext {
                sample_rate,
                buffer_size: Buffer::LEN,
                block_frames: Buffer::LEN,
                sub_block: 0,
            },
            node_indices: HashMap::new(),
            next_node_id: 0,
            terminal: None,
            frames_processed: 0,
        }
    }

    /// Add a node; the returned producer feeds its message queue.
    pub fn add<N: AudioNode>(&mut self, node: N, queue_size: usize) -> (NodeId, Producer<N::Message>) {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let (producer, consumer) = RingBuffer::new(queue_size);
        let buffers = vec![Buffer::SILENT; node.num_outputs()];
        let adapter = DaspAdapter {
            node: Box::new(NodeWrapper { node, receiver: consumer }),
            ctx: self.ctx,
        };

        let idx = self.graph.add_node(NodeData::new(adapter, buffers));
        self.node_indices.insert(id, idx);
        (id, producer)
    }

    /// Route the output of `from` into `to`. Returns `false` if either node
    /// is unknown.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        match (self.node_indices.get(&from), self.node_indices.get(&to)) {
            (Some(&a), Some(&b)) => {
                self.graph.add_edge(a, b, ());
                true
            }
            _ => false,
        }
    }

    pub fn set_terminal(&mut self, id: NodeId) -> bool {
        match self.node_indices.get(&id) {
            Some(&idx) => {
                self.terminal = Some(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_indices.contains_key(&id)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Mark the calling thread as the audio thread for this pass.
    pub fn pre_process(&mut self) {
        AUDIO_THREAD.with(|flag| flag.set(true));
    }

    /// Fill `out` from the terminal node, one sub-block at a time.
    ///
    /// `out.frames()` must be a multiple of [`Buffer::LEN`]. Channels the
    /// terminal does not produce are silenced.
    pub fn pull_block(&mut self, out: &mut PlanarBuffer) {
        let Some(terminal) = self.terminal else {
            out.zero();
            return;
        };

        let frames = out.frames();
        debug_assert_eq!(frames % Buffer::LEN, 0);

        for (sub_block, offset) in (0..frames).step_by(Buffer::LEN).enumerate() {
            self.ctx.block_frames = frames;
            self.ctx.sub_block = sub_block;
            for idx in self.graph.node_indices() {
                self.graph[idx].node.ctx = self.ctx;
            }
            self.processor.process(&mut self.graph, terminal);

            let buffers = &self.graph[terminal].buffers;
            let len = Buffer::LEN.min(frames - offset);
            for ch in 0..out.channels() {
                let dest = &mut out.channel_mut(ch)[offset..offset + len];
                dest.fill(0.0);
                if let Some(buffer) = buffers.get(ch) {
                    for (d, s) in dest.iter_mut().zip(buffer.iter()) {
                        *d += *s;
                    }
                }
            }
        }
    }

    pub fn post_process(&mut self, frames: usize) {
        self.frames_processed += frames as u64;
        AUDIO_THREAD.with(|flag| flag.set(false));
    }
}
