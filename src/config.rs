//! Context configuration.

use dasp_graph::Buffer;

use crate::device::Device;
use crate::error::{Error, Result};

/// Configuration of a processing [`Context`](crate::Context).
///
/// ## Fields
///
/// - `sample_rate`: graph processing rate in Hz (default: 48000)
/// - `frames_per_block`: frames rendered per hardware callback (default: 512).
///   Must be a non-zero multiple of the graph's 64-frame sub-block.
/// - `channels`: output channel count of the graph (default: 2)
/// - `ring_padding_factor`: capture ring capacity in blocks (default: 2, range 2..=4)
/// - `clip_detection`: silence a rendered block that exceeds `clip_threshold`
/// - `message_queue_size`: per-node control queue length
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Processing sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per hardware callback.
    pub frames_per_block: usize,
    /// Output channel count.
    pub channels: usize,
    /// Capture ring capacity, in blocks.
    pub ring_padding_factor: usize,
    /// Whether rendered blocks are checked for clipping.
    pub clip_detection: bool,
    /// Absolute sample value above which a block counts as clipped.
    pub clip_threshold: f32,
    /// Capacity of each node's message queue.
    pub message_queue_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frames_per_block: 512,
            channels: 2,
            ring_padding_factor: 2,
            clip_detection: true,
            clip_threshold: 2.0,
            message_queue_size: 64,
        }
    }
}

impl ContextConfig {
    /// Derive rate, block size and channel count from an output device.
    ///
    /// The device block size is rounded up to the next multiple of the
    /// graph sub-block.
    pub fn for_device(device: &Device) -> Self {
        let sub_block = Buffer::LEN;
        let frames = device.frames_per_block.max(1);
        Self {
            sample_rate: device.sample_rate,
            frames_per_block: frames.div_ceil(sub_block) * sub_block,
            channels: device.output_channels.clamp(1, 2),
            ..Self::default()
        }
    }

    /// Set the processing sample rate (builder pattern).
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the frames per hardware callback (builder pattern).
    pub fn with_frames_per_block(mut self, frames: usize) -> Self {
        self.frames_per_block = frames;
        self
    }

    /// Set the output channel count (builder pattern).
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Set the capture ring padding factor (builder pattern).
    pub fn with_ring_padding_factor(mut self, factor: usize) -> Self {
        self.ring_padding_factor = factor;
        self
    }

    /// Enable or disable clip detection (builder pattern).
    pub fn with_clip_detection(mut self, enabled: bool) -> Self {
        self.clip_detection = enabled;
        self
    }

    /// Check that the configuration can drive a graph.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.frames_per_block == 0 || self.frames_per_block % Buffer::LEN != 0 {
            return Err(Error::InvalidConfig(format!(
                "frames per block ({}) must be a non-zero multiple of {}",
                self.frames_per_block,
                Buffer::LEN
            )));
        }
        if self.channels == 0 {
            return Err(Error::InvalidConfig("channel count must be non-zero".into()));
        }
        if !(2..=4).contains(&self.ring_padding_factor) {
            return Err(Error::InvalidConfig(format!(
                "ring padding factor ({}) must be between 2 and 4",
                self.ring_padding_factor
            )));
        }
        if self.message_queue_size == 0 {
            return Err(Error::InvalidConfig("message queue size must be non-zero".into()));
        }
        Ok(())
    }
}
