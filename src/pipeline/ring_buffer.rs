//! Frame-granular single-producer/single-consumer ring buffer.
//!
//! Capture threads write converted frames straight into the buffer's free
//! space through a [`WriteVector`]; the application drains it with
//! [`RingConsumer::read`]. The free or filled region may wrap past the end of
//! the storage, in which case it is exposed as two contiguous segments.

use std::mem::MaybeUninit;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Free space of the ring as up to two contiguous byte segments.
///
/// Both segments hold a whole number of frames. `second` is empty unless the
/// free region wraps.
pub struct WriteVector<'a> {
    /// Segment starting at the write cursor.
    pub first: &'a mut [u8],
    /// Segment starting at the beginning of the storage.
    pub second: &'a mut [u8],
}

impl WriteVector<'_> {
    /// Total frames across both segments.
    #[must_use]
    pub fn frames(&self, frame_size: usize) -> usize {
        (self.first.len() + self.second.len()) / frame_size
    }
}

/// Writing half of the ring. Owned by the capture thread while it runs.
pub struct RingProducer {
    inner: HeapProd<u8>,
    frame_size: usize,
}

/// Reading half of the ring. Owned by the application side.
pub struct RingConsumer {
    inner: HeapCons<u8>,
    frame_size: usize,
}

/// Creates a ring holding `frames` frames of `frame_size` bytes.
///
/// # Example
///
/// ```
/// use stream_device::pipeline::ring_buffer;
///
/// let (mut producer, mut consumer) = ring_buffer(4, 2);
/// assert_eq!(producer.write(&[1, 0, 2, 0, 3, 0]), 3);
///
/// let mut out = [0u8; 8];
/// assert_eq!(consumer.read(&mut out, 4), 3);
/// assert_eq!(&out[..6], &[1, 0, 2, 0, 3, 0]);
/// ```
#[must_use]
pub fn ring_buffer(frames: usize, frame_size: usize) -> (RingProducer, RingConsumer) {
    let frame_size = frame_size.max(1);
    let capacity = frames.max(1) * frame_size;

    let rb = HeapRb::<u8>::new(capacity);
    let (mut producer, mut consumer) = rb.split();

    // Touch every byte once so vacant storage is always initialized memory.
    let zeros = vec![0u8; capacity];
    producer.push_slice(&zeros);
    consumer.clear();

    (
        RingProducer {
            inner: producer,
            frame_size,
        },
        RingConsumer {
            inner: consumer,
            frame_size,
        },
    )
}

#[allow(unsafe_code)]
fn assume_init(slice: &mut [MaybeUninit<u8>]) -> &mut [u8] {
    // SAFETY: `ring_buffer` writes every byte of the storage before the halves
    // are handed out, and u8 has no invalid bit patterns.
    unsafe { &mut *(std::ptr::from_mut::<[MaybeUninit<u8>]>(slice) as *mut [u8]) }
}

impl RingProducer {
    /// Bytes per frame.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Total capacity in frames.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get() / self.frame_size
    }

    /// Frames that can be written right now.
    #[must_use]
    pub fn write_space(&self) -> usize {
        self.inner.vacant_len() / self.frame_size
    }

    /// Exposes the free space for in-place writing.
    ///
    /// Nothing becomes visible to the reader until
    /// [`commit_write`](Self::commit_write).
    pub fn write_vector(&mut self) -> WriteVector<'_> {
        let (first, second) = self.inner.vacant_slices_mut();
        WriteVector {
            first: assume_init(first),
            second: assume_init(second),
        }
    }

    /// Publishes `frames` frames written through the last write vector.
    ///
    /// Clamped to the current write space.
    #[allow(unsafe_code)]
    pub fn commit_write(&mut self, frames: usize) {
        let frames = frames.min(self.write_space());
        // SAFETY: the count does not exceed the vacant length and the bytes it
        // covers are initialized (see `assume_init`).
        unsafe { self.inner.advance_write_index(frames * self.frame_size) };
    }

    /// Copies whole frames from `src`, returning how many fit.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let frames = (src.len() / self.frame_size).min(self.write_space());
        self.inner.push_slice(&src[..frames * self.frame_size]);
        frames
    }
}

impl RingConsumer {
    /// Bytes per frame.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Frames available to read.
    #[must_use]
    pub fn read_space(&self) -> usize {
        self.inner.occupied_len() / self.frame_size
    }

    /// The filled region as up to two contiguous segments.
    #[must_use]
    pub fn read_vector(&self) -> (&[u8], &[u8]) {
        self.inner.as_slices()
    }

    /// Copies up to `frames` frames into `dst`, returning how many were read.
    ///
    /// Never reads past what the producer has committed.
    pub fn read(&mut self, dst: &mut [u8], frames: usize) -> usize {
        let frames = frames
            .min(self.read_space())
            .min(dst.len() / self.frame_size);
        self.inner.pop_slice(&mut dst[..frames * self.frame_size]);
        frames
    }

    /// Drops up to `frames` frames, returning how many were dropped.
    pub fn skip(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.read_space());
        self.inner.skip(frames * self.frame_size);
        frames
    }

    /// Drops everything currently readable.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring() {
        let (producer, consumer) = ring_buffer(8, 4);
        assert_eq!(producer.capacity(), 8);
        assert_eq!(producer.write_space(), 8);
        assert_eq!(consumer.read_space(), 0);
    }

    #[test]
    fn test_write_only_whole_frames() {
        let (mut producer, consumer) = ring_buffer(4, 2);
        // 5 bytes = 2 whole frames + 1 stray byte
        assert_eq!(producer.write(&[1, 2, 3, 4, 5]), 2);
        assert_eq!(consumer.read_space(), 2);
    }

    #[test]
    fn test_write_stops_when_full() {
        let (mut producer, _consumer) = ring_buffer(2, 1);
        assert_eq!(producer.write(&[1, 2, 3]), 2);
        assert_eq!(producer.write_space(), 0);
        assert_eq!(producer.write(&[4]), 0);
    }

    #[test]
    fn test_read_never_over_reads() {
        let (mut producer, mut consumer) = ring_buffer(16, 2);
        producer.write(&[1, 1, 2, 2, 3, 3]);

        let mut out = [0u8; 32];
        assert_eq!(consumer.read(&mut out, 16), 3);
        assert_eq!(&out[..6], &[1, 1, 2, 2, 3, 3]);
        assert_eq!(consumer.read(&mut out, 16), 0);
    }

    #[test]
    fn test_write_vector_splits_at_wrap() {
        let (mut producer, mut consumer) = ring_buffer(4, 2);
        producer.write(&[0; 6]);
        let mut sink = [0u8; 4];
        consumer.read(&mut sink, 2);

        // Cursor sits at frame 3; free space is frame 3 then frames 0..1
        let vector = producer.write_vector();
        assert_eq!(vector.first.len(), 2);
        assert_eq!(vector.second.len(), 4);
        assert_eq!(vector.frames(2), 3);
    }

    #[test]
    fn test_commit_through_write_vector() {
        let (mut producer, mut consumer) = ring_buffer(4, 2);
        producer.write(&[9; 6]);
        let mut sink = [0u8; 6];
        consumer.read(&mut sink, 3);

        {
            let vector = producer.write_vector();
            vector.first.copy_from_slice(&[1, 1]);
            vector.second[..4].copy_from_slice(&[2, 2, 3, 3]);
        }
        producer.commit_write(3);

        assert_eq!(consumer.read_space(), 3);
        let (a, b) = consumer.read_vector();
        assert_eq!(a, &[1, 1]);
        assert_eq!(b, &[2, 2, 3, 3]);

        let mut out = [0u8; 6];
        assert_eq!(consumer.read(&mut out, 3), 3);
        assert_eq!(out, [1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_commit_is_clamped() {
        let (mut producer, consumer) = ring_buffer(2, 4);
        producer.commit_write(10);
        assert_eq!(consumer.read_space(), 2);
    }

    #[test]
    fn test_skip_and_clear() {
        let (mut producer, mut consumer) = ring_buffer(8, 1);
        producer.write(&[1, 2, 3, 4, 5]);
        assert_eq!(consumer.skip(2), 2);
        assert_eq!(consumer.read_space(), 3);
        consumer.clear();
        assert_eq!(consumer.read_space(), 0);
    }
}
