//! Ring-buffered byte log for everything the producer has ever written.
//!
//! All cross-module references into the log are *absolute positions*: `u64`
//! byte offsets in the producer's lifetime stream. The ring translates them
//! to offsets on access, so references stay valid across wraps and readers
//! simply get an empty range once a position has been overwritten.

/// Append-only byte ring with monotonically increasing absolute positions.
/// Capacity is rounded up to a power of two. Writes never block; the buffer
/// is overwritten cyclically and readers must tolerate eviction.
pub struct SourceBuffer {
    data: Box<[u8]>,
    mask: u64,
    /// Absolute position of the next byte to be written.
    head: u64,
}

impl SourceBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(4096).next_power_of_two();
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            mask: capacity as u64 - 1,
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Absolute position of the write head (one past the last committed byte).
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Reserve a writable contiguous range of up to `max_len` bytes. The
    /// range is clamped at the ring wrap; callers loop reserve/commit until
    /// their chunk is fully stored. Returns the absolute position of the
    /// range together with the writable slice.
    pub fn reserve(&mut self, max_len: usize) -> (u64, &mut [u8]) {
        let offset = (self.head & self.mask) as usize;
        let contiguous = self.data.len() - offset;
        let len = max_len.min(contiguous);
        (self.head, &mut self.data[offset..offset + len])
    }

    /// Advance the head past `n` just-written bytes. `n` must not exceed the
    /// capacity of the most recent `reserve`.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.data.len() - (self.head & self.mask) as usize);
        self.head += n as u64;
    }

    /// Read up to `len` bytes at absolute position `p`. The result may be
    /// shorter than requested when it straddles the ring wrap, and is empty
    /// when `p` has been evicted (or not yet written).
    pub fn read_at(&self, p: u64, len: usize) -> &[u8] {
        let window = self.data.len() as u64;
        let oldest = self.head.saturating_sub(window);
        if p < oldest || p >= self.head {
            return &[];
        }

        let offset = (p & self.mask) as usize;
        let mut len = len.min((self.head - p) as usize);
        len = len.min(self.data.len() - offset);
        &self.data[offset..offset + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(buffer: &mut SourceBuffer, bytes: &[u8]) -> u64 {
        let mut rest = bytes;
        let mut first = None;
        while !rest.is_empty() {
            let (at, dst) = buffer.reserve(rest.len());
            let n = dst.len().min(rest.len());
            dst[..n].copy_from_slice(&rest[..n]);
            buffer.commit(n);
            first.get_or_insert(at);
            rest = &rest[n..];
        }
        first.unwrap_or(buffer.head())
    }

    #[test]
    fn roundtrip() {
        let mut buffer = SourceBuffer::with_capacity(4096);
        let at = push(&mut buffer, b"hello world");
        assert_eq!(buffer.read_at(at, 11), b"hello world");
        assert_eq!(buffer.read_at(at + 6, 5), b"world");
    }

    #[test]
    fn read_past_head_is_empty() {
        let mut buffer = SourceBuffer::with_capacity(4096);
        push(&mut buffer, b"abc");
        assert!(buffer.read_at(3, 1).is_empty());
        assert!(buffer.read_at(100, 1).is_empty());
    }

    #[test]
    fn read_clamps_to_committed() {
        let mut buffer = SourceBuffer::with_capacity(4096);
        let at = push(&mut buffer, b"abc");
        assert_eq!(buffer.read_at(at, 64), b"abc");
    }

    #[test]
    fn evicted_positions_read_empty() {
        let mut buffer = SourceBuffer::with_capacity(4096);
        let capacity = buffer.capacity();
        let at = push(&mut buffer, b"first");
        // Push a full window more; "first" is now gone.
        let filler = vec![b'x'; capacity];
        push(&mut buffer, &filler);
        assert!(buffer.read_at(at, 5).is_empty());
    }

    #[test]
    fn reads_clamp_at_the_wrap() {
        let mut buffer = SourceBuffer::with_capacity(4096);
        let capacity = buffer.capacity();
        let filler = vec![b'x'; capacity - 2];
        push(&mut buffer, &filler);
        let at = push(&mut buffer, b"abcd");
        // The first fragment ends at the wrap; the tail needs a second read.
        let head_part = buffer.read_at(at, 4);
        assert_eq!(head_part, b"ab");
        let tail = buffer.read_at(at + head_part.len() as u64, 2);
        assert_eq!(tail, b"cd");
    }

    #[test]
    fn absolute_positions_survive_wrap() {
        let mut buffer = SourceBuffer::with_capacity(4096);
        let capacity = buffer.capacity();
        for _ in 0..3 {
            let filler = vec![b'y'; capacity / 2];
            push(&mut buffer, &filler);
        }
        let at = push(&mut buffer, b"marker");
        assert_eq!(buffer.read_at(at, 6), b"marker");
        assert!(at > capacity as u64);
    }
}
