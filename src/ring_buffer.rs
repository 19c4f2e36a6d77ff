//! Single-channel sample ring for the capture path.
//!
//! One writer (the hardware callback) and one reader (the graph pull) share
//! each ring. Both operations are all-or-nothing: a write that does not fit
//! leaves the ring untouched, and a read that cannot be satisfied leaves the
//! destination untouched. There is no locking; the split into
//! [`RingWriter`] and [`RingReader`] is what keeps the roles apart.

use rtrb::{Consumer, Producer, RingBuffer};

/// A write did not fit; nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ring overrun: {requested} samples offered, {free} slots free")]
pub struct Overrun {
    /// Samples the caller tried to write.
    pub requested: usize,
    /// Free slots at the time of the write.
    pub free: usize,
}

/// A read could not be satisfied; the destination was not touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ring underrun: {requested} samples requested, {available} buffered")]
pub struct Underrun {
    /// Samples the caller asked for.
    pub requested: usize,
    /// Samples available at the time of the read.
    pub available: usize,
}

/// Create a ring of `capacity` samples, split into its two ends.
pub fn channel_ring(capacity: usize) -> (RingWriter, RingReader) {
    let (producer, consumer) = RingBuffer::<f32>::new(capacity);
    (RingWriter { producer }, RingReader { consumer })
}

/// Writing end of a channel ring (hardware thread).
pub struct RingWriter {
    producer: Producer<f32>,
}

impl RingWriter {
    /// Append all of `samples`, or nothing.
    pub fn write(&mut self, samples: &[f32]) -> Result<(), Overrun> {
        let free = self.producer.slots();
        let chunk = self
            .producer
            .write_chunk_uninit(samples.len())
            .map_err(|_| Overrun {
                requested: samples.len(),
                free,
            })?;
        chunk.fill_from_iter(samples.iter().copied());
        Ok(())
    }

    /// Free slots.
    #[inline]
    pub fn free(&self) -> usize {
        self.producer.slots()
    }

    /// Total capacity in samples.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }
}

/// Reading end of a channel ring (graph thread).
pub struct RingReader {
    consumer: Consumer<f32>,
}

impl RingReader {
    /// Fill all of `dest`, or leave it untouched.
    pub fn read(&mut self, dest: &mut [f32]) -> Result<(), Underrun> {
        let available = self.consumer.slots();
        let chunk = self
            .consumer
            .read_chunk(dest.len())
            .map_err(|_| Underrun {
                requested: dest.len(),
                available,
            })?;

        let (first, second) = chunk.as_slices();
        dest[..first.len()].copy_from_slice(first);
        dest[first.len()..].copy_from_slice(second);
        chunk.commit_all();
        Ok(())
    }

    /// Buffered samples.
    #[inline]
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Total capacity in samples.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn write_then_read() {
        let (mut writer, mut reader) = channel_ring(8);
        writer.write(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(reader.available(), 3);

        let mut out = [0.0; 3];
        reader.read(&mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn overrun_writes_nothing() {
        let (mut writer, mut reader) = channel_ring(4);
        writer.write(&[1.0, 2.0, 3.0]).unwrap();

        let err = writer.write(&[4.0, 5.0]).unwrap_err();
        assert_eq!(err, Overrun { requested: 2, free: 1 });
        assert_eq!(reader.available(), 3);

        let mut out = [0.0; 3];
        reader.read(&mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn underrun_leaves_destination() {
        let (mut writer, mut reader) = channel_ring(8);
        writer.write(&[1.0, 2.0]).unwrap();

        let mut out = [9.0; 4];
        let err = reader.read(&mut out).unwrap_err();
        assert_eq!(err, Underrun { requested: 4, available: 2 });
        assert_eq!(out, [9.0; 4]);
        assert_eq!(reader.available(), 2);
    }

    #[test]
    fn wraps_around() {
        let (mut writer, mut reader) = channel_ring(4);
        let mut out = [0.0; 3];
        for round in 0..5 {
            let base = round as f32 * 10.0;
            writer.write(&[base, base + 1.0, base + 2.0]).unwrap();
            reader.read(&mut out).unwrap();
            assert_eq!(out, [base, base + 1.0, base + 2.0]);
        }
    }

    proptest! {
        #[test]
        fn round_trip_is_bit_identical(
            channels in 1usize..6,
            frames in 1usize..300,
            padding in 1usize..4,
            seed in any::<u32>(),
        ) {
            let rings: Vec<_> = (0..channels).map(|_| channel_ring(frames * padding)).collect();
            let (mut writers, mut readers): (Vec<_>, Vec<_>) = rings.into_iter().unzip();

            for (ch, writer) in writers.iter_mut().enumerate() {
                let block: Vec<f32> = (0..frames)
                    .map(|i| f32::from_bits(seed.wrapping_add((ch * frames + i) as u32) & 0x3fff_ffff))
                    .collect();
                prop_assert!(writer.write(&block).is_ok());
            }
            for (ch, reader) in readers.iter_mut().enumerate() {
                let mut out = vec![0.0f32; frames];
                prop_assert!(reader.read(&mut out).is_ok());
                for (i, sample) in out.iter().enumerate() {
                    let expected = f32::from_bits(seed.wrapping_add((ch * frames + i) as u32) & 0x3fff_ffff);
                    prop_assert_eq!(sample.to_bits(), expected.to_bits());
                }
            }
        }
    }
}
