use core::cmp;

use managed::ManagedSlice;

/// A ring buffer.
///
/// This ring buffer implementation provides many ways to interact with it:
///
///   * Enqueueing or dequeueing a slice of elements, copying as many as fit;
///   * Writing into the unallocated area past the allocated one, and later
///     marking a prefix of it allocated (used for out-of-order reassembly);
///   * Reading from an arbitrary position inside the allocated area without
///     dequeueing it (used for retransmission).
///
/// The buffer never reallocates; its capacity is fixed by the storage it
/// was created with.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is reset.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
    {
        RingBuffer {
            storage: storage.into(),
            read_at: 0,
            length: 0,
        }
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    /// Shorthand for `(self.read_at + idx) % self.capacity()` with an
    /// additional check to ensure that the capacity is not zero.
    fn get_idx(&self, idx: usize) -> usize {
        let len = self.capacity();
        if len > 0 { (self.read_at + idx) % len } else { 0 }
    }
}

impl<'a, T: 'a + Copy> RingBuffer<'a, T> {
    /// Write as many elements from `data` as fit into the unallocated area,
    /// starting `offset` elements past its beginning, and return the number
    /// of elements written.
    ///
    /// The written elements are not enqueued; see `enqueue_unallocated`.
    pub fn write_unallocated(&mut self, offset: usize, data: &[T]) -> usize {
        if offset > self.window() {
            return 0;
        }
        let size = cmp::min(data.len(), self.window() - offset);
        if size == 0 {
            return 0;
        }

        let start_at = self.get_idx(self.length + offset);
        let first = cmp::min(size, self.capacity() - start_at);
        self.storage[start_at..start_at + first].copy_from_slice(&data[..first]);
        if first < size {
            self.storage[..size - first].copy_from_slice(&data[first..size]);
        }
        size
    }

    /// Enqueue the given number of unallocated elements.
    ///
    /// # Panics
    /// This function panics if the amount of elements to enqueue is larger
    /// than the window.
    pub fn enqueue_unallocated(&mut self, count: usize) {
        assert!(count <= self.window());
        self.length += count;
    }

    /// Copy elements of the allocated area, starting `offset` elements past
    /// its beginning, into `data`, and return the number of elements copied.
    pub fn read_allocated(&self, offset: usize, data: &mut [T]) -> usize {
        if offset > self.length {
            return 0;
        }
        let size = cmp::min(data.len(), self.length - offset);
        if size == 0 {
            return 0;
        }

        let start_at = self.get_idx(offset);
        let first = cmp::min(size, self.capacity() - start_at);
        data[..first].copy_from_slice(&self.storage[start_at..start_at + first]);
        if first < size {
            data[first..size].copy_from_slice(&self.storage[..size - first]);
        }
        size
    }

    /// Dequeue the given number of allocated elements.
    ///
    /// The unallocated area keeps its position, so elements written there
    /// ahead of time stay in place.
    ///
    /// # Panics
    /// This function panics if the amount of elements to dequeue is larger
    /// than the amount of allocated elements.
    pub fn dequeue_allocated(&mut self, count: usize) {
        assert!(count <= self.length);
        self.read_at = self.get_idx(count);
        self.length -= count;
    }

    /// Enqueue a slice of elements up to the given size into the buffer,
    /// and return the amount of elements that were enqueued.
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize {
        let size = self.write_unallocated(0, data);
        self.enqueue_unallocated(size);
        size
    }

    /// Dequeue a slice of elements up to the given size from the buffer,
    /// and return the amount of elements that were dequeued.
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize {
        let size = self.read_allocated(0, data);
        self.dequeue_allocated(size);
        size
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_buffer_length_changes() {
        let mut ring = RingBuffer::new(vec![0u8; 2]);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.capacity(), 2);
        assert_eq!(ring.window(), 2);

        ring.length = 1;
        assert!(!ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.window(), 1);

        ring.length = 2;
        assert!(ring.is_full());
        assert_eq!(ring.window(), 0);
    }

    #[test]
    fn test_buffer_enqueue_dequeue_slice_wraps() {
        let mut ring = RingBuffer::new(vec![0u8; 8]);
        assert_eq!(ring.enqueue_slice(b"abcdef"), 6);
        let mut buf = [0u8; 4];
        assert_eq!(ring.dequeue_slice(&mut buf), 4);
        assert_eq!(&buf, b"abcd");

        // Wraps around the end of the storage.
        assert_eq!(ring.enqueue_slice(b"ghijklmn"), 6);
        assert!(ring.is_full());

        let mut out = [0u8; 8];
        assert_eq!(ring.dequeue_slice(&mut out), 8);
        assert_eq!(&out, b"efghijkl");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_buffer_write_unallocated() {
        let mut ring = RingBuffer::new(vec![0u8; 8]);
        assert_eq!(ring.write_unallocated(4, b"xyz"), 3);
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.write_unallocated(0, b"abcd"), 4);
        ring.enqueue_unallocated(7);

        let mut out = [0u8; 7];
        assert_eq!(ring.read_allocated(0, &mut out), 7);
        assert_eq!(&out, b"abcdxyz");

        // Writes past the window are truncated.
        assert_eq!(ring.write_unallocated(0, b"0123"), 1);
        assert_eq!(ring.write_unallocated(2, b"0"), 0);
    }

    #[test]
    fn test_buffer_read_allocated_at_offset() {
        let mut ring = RingBuffer::new(vec![0u8; 6]);
        ring.enqueue_slice(b"abcd");
        ring.dequeue_allocated(3);
        ring.enqueue_slice(b"efghi");
        assert_eq!(ring.len(), 6);

        let mut out = [0u8; 3];
        assert_eq!(ring.read_allocated(2, &mut out), 3);
        assert_eq!(&out, b"fgh");
        assert_eq!(ring.read_allocated(5, &mut out), 1);
        assert_eq!(out[0], b'i');
        assert_eq!(ring.read_allocated(7, &mut out), 0);
        // Reading does not consume.
        assert_eq!(ring.len(), 6);
    }

    #[test]
    fn test_buffer_drain_keeps_unallocated() {
        let mut ring = RingBuffer::new(vec![0u8; 12]);
        assert_eq!(ring.enqueue_slice(b"abcd"), 4);
        assert_eq!(ring.write_unallocated(4, b"ijkl"), 4);

        let mut out = [0u8; 4];
        assert_eq!(ring.dequeue_slice(&mut out), 4);
        assert!(ring.is_empty());

        // The gap is filled after the allocated area drained.
        assert_eq!(ring.write_unallocated(0, b"efgh"), 4);
        ring.enqueue_unallocated(8);
        let mut out = [0u8; 8];
        assert_eq!(ring.dequeue_slice(&mut out), 8);
        assert_eq!(&out, b"efghijkl");
    }

    #[test]
    fn test_buffer_zero_capacity() {
        let mut ring = RingBuffer::new(vec![0u8; 0]);
        assert_eq!(ring.enqueue_slice(b"a"), 0);
        let mut out = [0u8; 1];
        assert_eq!(ring.dequeue_slice(&mut out), 0);
    }
}
