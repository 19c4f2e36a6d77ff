//! Input publication shared between a render bridge and its captures.

use std::sync::atomic::{AtomicBool, Ordering};

use dasp_graph::Buffer;
use parking_lot::Mutex;

use crate::buffer::deinterleave_channel;

/// The link a capture bridge exposes to the render bridge of its device.
///
/// While bound, the render callback publishes its interleaved input here
/// before running the graph and retracts it afterwards. The capture node
/// reads the publication one sub-block at a time during that graph pass.
/// Both sides only ever `try_lock`; the control thread takes the lock to
/// bind and unbind.
pub(crate) struct DuplexLink {
    bound: AtomicBool,
    publication: Mutex<Publication>,
}

struct Publication {
    samples: Vec<f32>,
    channels: usize,
    valid: bool,
    cursor: usize,
}

impl DuplexLink {
    pub fn new() -> Self {
        Self {
            bound: AtomicBool::new(false),
            publication: Mutex::new(Publication {
                samples: Vec::new(),
                channels: 0,
                valid: false,
                cursor: 0,
            }),
        }
    }

    /// Size the publication for `frames` of `channels`-wide input and mark
    /// the link bound.
    pub fn bind(&self, frames: usize, channels: usize) {
        let mut publication = self.publication.lock();
        publication.samples = vec![0.0; frames * channels];
        publication.channels = channels;
        publication.valid = false;
        publication.cursor = 0;
        self.bound.store(true, Ordering::Release);
    }

    pub fn unbind(&self) {
        self.bound.store(false, Ordering::Release);
        self.publication.lock().valid = false;
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Publish this callback's input.
    pub fn publish(&self, input: &[f32]) {
        let Some(mut guard) = self.publication.try_lock() else {
            return;
        };
        let publication = &mut *guard;
        let n = input.len().min(publication.samples.len());
        publication.samples[..n].copy_from_slice(&input[..n]);
        publication.samples[n..].fill(0.0);
        publication.valid = true;
        publication.cursor = 0;
    }

    /// End the publication; the input is gone once the callback returns.
    pub fn retract(&self) {
        if let Some(mut publication) = self.publication.try_lock() {
            publication.valid = false;
        }
    }

    /// De-interleave the next sub-block of the published input into
    /// `outputs`. Returns `false` if nothing is published.
    pub fn read_next(&self, outputs: &mut [Buffer]) -> bool {
        let Some(mut publication) = self.publication.try_lock() else {
            return false;
        };
        if !publication.valid {
            return false;
        }
        for (ch, out) in outputs.iter_mut().enumerate() {
            deinterleave_channel(&publication.samples, publication.channels, ch, publication.cursor, out);
        }
        publication.cursor += Buffer::LEN;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_only_while_published() {
        let link = DuplexLink::new();
        link.bind(128, 2);
        let mut outputs = vec![Buffer::SILENT; 2];
        assert!(!link.read_next(&mut outputs));

        let input: Vec<f32> = (0..256).map(|i| i as f32).collect();
        link.publish(&input);
        assert!(link.read_next(&mut outputs));
        assert_eq!(outputs[0][1], 2.0);
        assert_eq!(outputs[1][1], 3.0);

        assert!(link.read_next(&mut outputs));
        assert_eq!(outputs[0][0], 128.0);

        link.retract();
        assert!(!link.read_next(&mut outputs));
    }

    #[test]
    fn unbind_invalidates() {
        let link = DuplexLink::new();
        link.bind(64, 1);
        link.publish(&[0.5; 64]);
        link.unbind();
        assert!(!link.is_bound());
        let mut outputs = vec![Buffer::SILENT; 1];
        assert!(!link.read_next(&mut outputs));
    }
}
