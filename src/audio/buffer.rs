//! Fixed-capacity sample ring for the real-time renderer
//!
//! Owned by a single [`RingBufferRenderer`](super::renderer::RingBufferRenderer);
//! never shared across threads. All storage is allocated up front, so the
//! write and read paths never allocate.

/// Scale factor between 16-bit PCM and normalized floats
pub const PCM16_SCALE: f32 = 32768.0;

/// Circular float buffer with overwrite-oldest overflow
pub struct RingBuffer {
    samples: Box<[f32]>,
    write_pos: usize,
    read_pos: usize,
    /// Unread samples
    len: usize,
    /// Samples lost to overflow since creation
    dropped: u64,
}

impl RingBuffer {
    /// Create a ring holding `capacity` samples (must be non-zero)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");
        Self {
            samples: vec![0.0; capacity].into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            len: 0,
            dropped: 0,
        }
    }

    /// Write one sample. When full, the oldest unread sample is dropped
    /// so the writer never waits.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        let capacity = self.samples.len();
        if self.len == capacity {
            self.read_pos = (self.read_pos + 1) % capacity;
            self.dropped += 1;
        } else {
            self.len += 1;
        }
        self.samples[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % capacity;
    }

    /// Write float samples
    pub fn write(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.push(sample);
        }
    }

    /// Write 16-bit samples, normalizing to [-1, 1)
    pub fn write_pcm16(&mut self, samples: &[i16]) {
        for &sample in samples {
            self.push(sample as f32 / PCM16_SCALE);
        }
    }

    /// Take the oldest unread sample
    #[inline]
    pub fn pop(&mut self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        let sample = self.samples[self.read_pos];
        self.read_pos = (self.read_pos + 1) % self.samples.len();
        self.len -= 1;
        Some(sample)
    }

    /// Fill `out` from the read cursor. Positions past the written data are
    /// set to silence and the cursor holds. Returns the number of real samples.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.pop() {
                Some(sample) => {
                    *slot = sample;
                    filled += 1;
                }
                None => *slot = 0.0,
            }
        }
        filled
    }

    /// Jump the read cursor to the write cursor, discarding unread audio
    pub fn reset_to_write(&mut self) -> usize {
        let discarded = self.len;
        self.read_pos = self.write_pos;
        self.len = 0;
        discarded
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// Samples overwritten before they could be read
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_overflow_drops_oldest() {
        let mut ring = RingBuffer::new(10);
        let input: Vec<f32> = (0..15).map(|i| i as f32).collect();
        ring.write(&input);

        assert_eq!(ring.read_position(), 5);
        assert_eq!(ring.dropped(), 5);
        assert_eq!(ring.len(), 10);

        let mut out = [0.0f32; 10];
        assert_eq!(ring.read(&mut out), 10);
        let expected: Vec<f32> = (5..15).map(|i| i as f32).collect();
        assert_eq!(out.to_vec(), expected);
    }

    #[test]
    fn test_underrun_emits_silence_and_holds() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[0.5, -0.5]);

        let mut out = [1.0f32; 4];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
        assert_eq!(ring.read_position(), ring.write_position());

        ring.write(&[0.25]);
        let mut out = [0.0f32; 1];
        assert_eq!(ring.read(&mut out), 1);
        assert_eq!(out[0], 0.25);
    }

    #[test]
    fn test_reset_to_write() {
        let mut ring = RingBuffer::new(16);
        ring.write(&[0.1; 12]);
        assert_eq!(ring.reset_to_write(), 12);
        assert!(ring.is_empty());

        let mut out = [1.0f32; 4];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_pcm16_extremes() {
        let mut ring = RingBuffer::new(4);
        ring.write_pcm16(&[i16::MIN, 0, i16::MAX]);
        assert_eq!(ring.pop(), Some(-1.0));
        assert_eq!(ring.pop(), Some(0.0));
        let max = ring.pop().unwrap();
        assert!(max < 1.0 && max > 0.9999);
    }

    proptest! {
        #[test]
        fn pcm16_round_trip(samples in proptest::collection::vec(any::<i16>(), 0..512)) {
            let mut ring = RingBuffer::new(512);
            ring.write_pcm16(&samples);

            let mut out = vec![0.0f32; samples.len()];
            prop_assert_eq!(ring.read(&mut out), samples.len());
            for (original, decoded) in samples.iter().zip(out.iter()) {
                let expected = *original as f32 / PCM16_SCALE;
                prop_assert!((expected - decoded).abs() <= 1.0 / PCM16_SCALE);
            }
        }
    }
}
