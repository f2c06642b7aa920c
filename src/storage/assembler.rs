use core::fmt;

use heapless::Vec;

use crate::config::ASSEMBLER_MAX_SEGMENT_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooManyHolesError;

impl fmt::Display for TooManyHolesError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "too many holes")
    }
}

impl core::error::Error for TooManyHolesError {}

/// A buffer (re)assembler.
///
/// Tracks which byte ranges past a moving origin have been received. Offsets
/// are relative to the origin; removing the front range moves the origin to
/// its end. Up to `ASSEMBLER_MAX_SEGMENT_COUNT` disjoint ranges are tracked.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Assembler {
    /// Present ranges as `(start, end)`, sorted, disjoint and never adjacent.
    ranges: Vec<(usize, usize), ASSEMBLER_MAX_SEGMENT_COUNT>,
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        let mut last = 0;
        for &(start, end) in self.ranges.iter() {
            if start > last {
                write!(f, "({}) ", start - last)?;
            }
            write!(f, "{} ", end - start)?;
            last = end;
        }
        write!(f, "]")
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Create a new buffer assembler.
    pub const fn new() -> Assembler {
        Assembler { ranges: Vec::new() }
    }

    /// Return length of the front contiguous range without removing it from the assembler
    pub fn peek_front(&self) -> usize {
        match self.ranges.first() {
            Some(&(0, end)) => end,
            _ => 0,
        }
    }

    /// Return whether the assembler contains no data.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Return how many bytes of `offset..offset + size` are already present.
    pub fn covered(&self, offset: usize, size: usize) -> usize {
        let end = offset + size;
        self.ranges
            .iter()
            .take_while(|&&(start, _)| start < end)
            .map(|&(start, stop)| stop.min(end).saturating_sub(start.max(offset)))
            .sum()
    }

    /// Add a new contiguous range to the assembler,
    /// or return `Err(TooManyHolesError)` if too many discontinuities are already recorded.
    pub fn add(&mut self, offset: usize, size: usize) -> Result<(), TooManyHolesError> {
        if size == 0 {
            return Ok(());
        }
        let end = offset + size;

        // First range that touches or follows the new one.
        let first = self
            .ranges
            .iter()
            .position(|&(_, e)| e >= offset)
            .unwrap_or(self.ranges.len());
        // One past the last range that touches the new one.
        let last = self.ranges[first..]
            .iter()
            .position(|&(s, _)| s > end)
            .map_or(self.ranges.len(), |p| first + p);

        if first == last {
            return self
                .ranges
                .insert(first, (offset, end))
                .map_err(|_| TooManyHolesError);
        }

        let merged = (
            offset.min(self.ranges[first].0),
            end.max(self.ranges[last - 1].1),
        );
        self.ranges[first] = merged;
        for _ in first + 1..last {
            self.ranges.remove(first + 1);
        }
        Ok(())
    }

    /// Remove a contiguous range from the front of the assembler.
    /// If no such range, return 0.
    pub fn remove_front(&mut self) -> usize {
        let size = self.peek_front();
        if size != 0 {
            self.ranges.remove(0);
            self.shift(size);
        }
        size
    }

    /// Add a segment, then remove_front.
    ///
    /// This is equivalent to calling `add` then `remove_front` individually,
    /// except it's guaranteed to not fail when offset = 0: the next expected
    /// segment must never be dropped, or the stream might get stuck.
    pub fn add_then_remove_front(
        &mut self,
        offset: usize,
        size: usize,
    ) -> Result<usize, TooManyHolesError> {
        if offset == 0 && self.ranges.first().is_none_or(|&(start, _)| size < start) {
            self.shift(size);
            return Ok(size);
        }

        self.add(offset, size)?;
        Ok(self.remove_front())
    }

    /// Move the origin forward by `size`, which must not cut into a range.
    fn shift(&mut self, size: usize) {
        for range in self.ranges.iter_mut() {
            debug_assert!(range.0 >= size);
            range.0 -= size;
            range.1 -= size;
        }
    }
}
