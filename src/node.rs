//! Graph node trait and per-pass context.

use dasp_graph::{Buffer, Input};

/// Information available while the graph runs.
///
/// Passed to every [`AudioNode::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Graph processing rate in Hz.
    pub sample_rate: u32,
    /// Frames per sub-block (always [`Buffer::LEN`]).
    pub buffer_size: usize,
    /// Frames pulled by the current hardware callback.
    pub block_frames: usize,
    /// Position of this sub-block within the callback's block, from 0.
    pub sub_block: usize,
}

/// Identifies a node within a [`Context`](crate::Context) graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// Anything that names a node in the graph: a [`Handle`](crate::Handle) or a
/// [`CaptureBridge`](crate::CaptureBridge).
pub trait GraphNode {
    fn node_id(&self) -> NodeId;
}

impl GraphNode for NodeId {
    fn node_id(&self) -> NodeId {
        *self
    }
}

/// A processing node.
///
/// The graph calls `process` once per 64-frame sub-block, on the audio
/// thread. Implementations must not block or allocate there.
///
/// Parameters arrive as messages rather than shared state. Drain `messages`
/// at the top of `process`:
///
/// ```
/// use klangport::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum Level {
///     Set(f32),
/// }
///
/// struct Constant {
///     level: f32,
/// }
///
/// impl AudioNode for Constant {
///     type Message = Level;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = Level>,
///         _inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for Level::Set(level) in messages {
///             self.level = level;
///         }
///         for out in outputs.iter_mut() {
///             out.iter_mut().for_each(|s| *s = self.level);
///         }
///     }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates; `()` if the node takes none.
    type Message: Send + 'static;

    /// Process one sub-block.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of output channels.
    fn num_outputs(&self) -> usize {
        1
    }
}
