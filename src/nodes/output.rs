//! Terminal node of the context graph.

use dasp_graph::{Buffer, Input};

use crate::node::{AudioNode, ProcessContext};

/// Sums everything routed to the context output.
///
/// Each input buffer `ch` lands on output channel `ch`; a mono input feeds
/// every output channel.
pub struct OutputNode {
    channels: usize,
}

impl OutputNode {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl AudioNode for OutputNode {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for out in outputs.iter_mut() {
            out.iter_mut().for_each(|s| *s = 0.0);
        }

        for input in inputs {
            let buffers = input.buffers();
            if buffers.is_empty() {
                continue;
            }
            for (ch, out) in outputs.iter_mut().enumerate() {
                let src = &buffers[ch.min(buffers.len() - 1)];
                for (o, s) in out.iter_mut().zip(src.iter()) {
                    *o += *s;
                }
            }
        }
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}
