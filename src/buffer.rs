//! Channel-contiguous sample storage and layout conversion.

/// A de-interleaved multi-channel buffer.
///
/// Storage is allocated once for `capacity` frames per channel. The active
/// frame count can shrink and grow within that capacity without touching the
/// allocator, which is what the hardware-thread paths rely on.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarBuffer {
    data: Vec<f32>,
    channels: usize,
    capacity: usize,
    frames: usize,
}

impl PlanarBuffer {
    /// Allocate a silent buffer with `capacity` active frames.
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            data: vec![0.0; channels * capacity],
            channels,
            capacity,
            frames: capacity,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Active frames per channel.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Frames per channel the storage can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the active frame count.
    ///
    /// # Panics
    ///
    /// Panics if `frames` exceeds the capacity.
    pub fn set_frames(&mut self, frames: usize) {
        assert!(
            frames <= self.capacity,
            "{} frames exceed buffer capacity of {}",
            frames,
            self.capacity
        );
        self.frames = frames;
    }

    /// Active samples of one channel.
    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        let start = ch * self.capacity;
        &self.data[start..start + self.frames]
    }

    /// Active samples of one channel, mutably.
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        let start = ch * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Silence the active frames of every channel.
    pub fn zero(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Largest absolute sample among the active frames.
    pub fn peak(&self) -> f32 {
        (0..self.channels)
            .flat_map(|ch| self.channel(ch).iter())
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Write the active frames into an interleaved buffer of `out_channels`.
    ///
    /// Output channels beyond this buffer's channel count are silenced.
    pub fn interleave_into(&self, out: &mut [f32], out_channels: usize) {
        if out_channels == 0 {
            return;
        }
        if out_channels == 1 && self.channels >= 1 {
            let n = self.frames.min(out.len());
            out[..n].copy_from_slice(&self.channel(0)[..n]);
            return;
        }

        for (i, frame) in out.chunks_exact_mut(out_channels).take(self.frames).enumerate() {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = if ch < self.channels {
                    self.data[ch * self.capacity + i]
                } else {
                    0.0
                };
            }
        }
    }
}

/// Copy one channel out of an interleaved buffer of `channels` channels,
/// starting at frame `first_frame`, into `dest`.
///
/// Samples past the end of the source (or a channel the source lacks) are
/// written as silence.
pub fn deinterleave_channel(
    interleaved: &[f32],
    channels: usize,
    ch: usize,
    first_frame: usize,
    dest: &mut [f32],
) {
    if ch >= channels {
        dest.fill(0.0);
        return;
    }
    for (i, sample) in dest.iter_mut().enumerate() {
        *sample = interleaved
            .get((first_frame + i) * channels + ch)
            .copied()
            .unwrap_or(0.0);
    }
}
