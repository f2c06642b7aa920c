use core::cmp;
use core::fmt;

use alloc::vec;
use managed::ManagedSlice;

use super::{Assembler, RingBuffer};

/// Error returned by [`StreamBuffer::write`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WriteError {
    /// The offset lies outside of `[cursor, cursor + capacity)`.
    OutOfRange,
    /// The bytes would extend past the end of the window, or the buffer
    /// cannot track another discontinuity.
    NotEnoughSpace,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            WriteError::OutOfRange => write!(f, "offset out of range"),
            WriteError::NotEnoughSpace => write!(f, "not enough space"),
        }
    }
}

impl core::error::Error for WriteError {}

/// A bounded byte stream addressed by absolute offset.
///
/// The buffer holds the bytes of `[cursor, cursor + capacity)`. Bytes may be
/// written anywhere in that window and in any order; the prefix that has
/// become contiguous from the cursor can be read, peeked or skipped.
#[derive(Debug)]
pub struct StreamBuffer<'a> {
    ring: RingBuffer<'a, u8>,
    assembler: Assembler,
    /// Absolute offset of the first byte held by `ring`.
    cursor: u64,
}

impl<'a> StreamBuffer<'a> {
    /// Create a stream buffer over the given storage, starting at offset zero.
    pub fn new<S>(storage: S) -> StreamBuffer<'a>
    where
        S: Into<ManagedSlice<'a, u8>>,
    {
        StreamBuffer {
            ring: RingBuffer::new(storage),
            assembler: Assembler::new(),
            cursor: 0,
        }
    }

    /// Create a heap-allocated stream buffer of the given capacity.
    pub fn with_capacity(capacity: usize) -> StreamBuffer<'static> {
        StreamBuffer::new(vec![0u8; capacity])
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Absolute offset of the next byte to be read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Absolute offset one past the contiguous prefix.
    pub fn contiguous_end(&self) -> u64 {
        self.cursor + self.ring.len() as u64
    }

    /// Absolute offset one past the last byte the buffer can hold.
    pub fn window_end(&self) -> u64 {
        self.cursor + self.capacity() as u64
    }

    /// Number of contiguous bytes ready to be read.
    pub fn readable_bytes(&self) -> usize {
        self.ring.len()
    }

    /// Number of bytes that can still be stored past the contiguous prefix.
    pub fn writable_bytes(&self) -> usize {
        self.ring.window()
    }

    /// Whether bytes past a hole are being held for reassembly.
    pub fn has_holes(&self) -> bool {
        !self.assembler.is_empty()
    }

    /// Store `data` at the absolute `offset`.
    ///
    /// Returns the number of bytes that were new to the buffer; bytes
    /// already contiguous or already held past a hole are not counted.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, WriteError> {
        if offset < self.cursor || offset >= self.window_end() {
            return Err(WriteError::OutOfRange);
        }
        let end = offset + data.len() as u64;
        if end > self.window_end() {
            return Err(WriteError::NotEnoughSpace);
        }

        let contiguous_end = self.contiguous_end();
        if end <= contiguous_end {
            return Ok(0);
        }
        let (offset, data) = if offset < contiguous_end {
            let overlap = (contiguous_end - offset) as usize;
            (contiguous_end, &data[overlap..])
        } else {
            (offset, data)
        };

        let rel = (offset - contiguous_end) as usize;
        let fresh = data.len() - self.assembler.covered(rel, data.len());
        if fresh == 0 {
            return Ok(0);
        }
        let contig_len = self
            .assembler
            .add_then_remove_front(rel, data.len())
            .map_err(|_| WriteError::NotEnoughSpace)?;
        let written = self.ring.write_unallocated(rel, data);
        debug_assert_eq!(written, data.len());
        if contig_len != 0 {
            self.ring.enqueue_unallocated(contig_len);
        }
        if self.has_holes() {
            net_trace!("stream buffer: reassembling {}", self.assembler);
        }
        Ok(fresh)
    }

    /// Append as many bytes of `data` as fit after the contiguous prefix.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let size = cmp::min(data.len(), self.writable_bytes());
        if size == 0 {
            return 0;
        }
        self.write(self.contiguous_end(), &data[..size])
            .unwrap_or(0)
    }

    /// Copy contiguous bytes from the cursor into `buf` and consume them.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let size = self.ring.dequeue_slice(buf);
        self.cursor += size as u64;
        size
    }

    /// Copy contiguous bytes from the cursor into `buf` without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        self.ring.read_allocated(0, buf)
    }

    /// Copy contiguous bytes starting at the absolute `offset` into `buf`
    /// without consuming them.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset < self.cursor || offset > self.contiguous_end() {
            return 0;
        }
        self.ring.read_allocated((offset - self.cursor) as usize, buf)
    }

    /// Advance the cursor over up to `len` contiguous bytes; return how many were skipped.
    pub fn skip(&mut self, len: usize) -> usize {
        let size = cmp::min(len, self.ring.len());
        self.ring.dequeue_allocated(size);
        self.cursor += size as u64;
        size
    }
}
