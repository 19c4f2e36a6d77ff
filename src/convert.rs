//! Sample-rate conversion for the capture path.

use crate::buffer::PlanarBuffer;

/// Converts blocks of audio from one sample rate to another.
///
/// A converter is streaming: state carries over between calls, so feeding
/// consecutive blocks yields a continuous signal. Implementations must not
/// allocate in [`convert`](RateConverter::convert); it runs on the hardware
/// thread.
pub trait RateConverter: Send {
    /// Convert the active frames of `source` into `dest`.
    ///
    /// Returns `(consumed, produced)`. `dest`'s active frame count is set to
    /// `produced`, which never exceeds
    /// [`dest_max_frames_per_block`](RateConverter::dest_max_frames_per_block).
    fn convert(&mut self, source: &PlanarBuffer, dest: &mut PlanarBuffer) -> (usize, usize);

    /// Largest input block accepted per call.
    fn source_max_frames_per_block(&self) -> usize;

    /// Largest output block a call can produce.
    fn dest_max_frames_per_block(&self) -> usize;
}

/// Streaming linear-interpolation converter.
pub struct LinearConverter {
    source_rate: u32,
    dest_rate: u32,
    /// Source frames advanced per output frame.
    step: f64,
    /// Position of the next output, in source frames relative to the start of
    /// the next block. Negative positions interpolate from `prev`.
    phase: f64,
    prev: Vec<f32>,
    source_max: usize,
    dest_max: usize,
}

impl LinearConverter {
    pub fn new(source_rate: u32, dest_rate: u32, channels: usize, source_max_frames: usize) -> Self {
        let step = source_rate as f64 / dest_rate as f64;
        let dest_max = (source_max_frames as f64 / step).ceil() as usize + 1;
        Self {
            source_rate,
            dest_rate,
            step,
            phase: 0.0,
            prev: vec![0.0; channels],
            source_max: source_max_frames,
            dest_max,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn dest_rate(&self) -> u32 {
        self.dest_rate
    }
}

impl RateConverter for LinearConverter {
    fn convert(&mut self, source: &PlanarBuffer, dest: &mut PlanarBuffer) -> (usize, usize) {
        let n = source.frames().min(self.source_max);
        if n == 0 {
            dest.set_frames(0);
            return (0, 0);
        }

        let limit = dest.capacity().min(self.dest_max);
        let channels = source.channels().min(dest.channels()).min(self.prev.len());
        dest.set_frames(limit);

        let end = (n - 1) as f64;
        let mut phase = self.phase;
        let mut produced = 0;
        while phase < end && produced < limit {
            for ch in 0..channels {
                let x = &source.channel(ch)[..n];
                let sample = if phase < 0.0 {
                    let frac = (phase + 1.0) as f32;
                    self.prev[ch] + (x[0] - self.prev[ch]) * frac
                } else {
                    let i = phase as usize;
                    let frac = (phase - i as f64) as f32;
                    x[i] + (x[i + 1] - x[i]) * frac
                };
                dest.channel_mut(ch)[produced] = sample;
            }
            produced += 1;
            phase += self.step;
        }

        // A short destination drops the remainder of this block.
        self.phase = (phase - n as f64).max(-1.0);
        for ch in 0..channels {
            self.prev[ch] = source.channel(ch)[n - 1];
        }

        dest.set_frames(produced);
        (n, produced)
    }

    fn source_max_frames_per_block(&self) -> usize {
        self.source_max
    }

    fn dest_max_frames_per_block(&self) -> usize {
        self.dest_max
    }
}
