use core::ops::{Index, Range, RangeFrom, RangeFull, RangeTo};

/// Max capacity to keep for the inner Vec<u8> when `WriteBuf::clear` is called.
const MAX_CAPACITY_WHEN_CLEARED: usize = 16384; // 16 kib

/// Growable buffer backed by a [`Vec<u8>`] that is incrementally filled.
///
/// This type is tracking the filled region and provides methods to
/// grow and write into the unfilled region.
pub struct WriteBuf {
    inner: Vec<u8>,
    filled: usize,
}

impl WriteBuf {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: Vec::new(),
            filled: 0,
        }
    }

    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.inner
    }

    /// Returns length of the filled region.
    #[inline]
    pub const fn filled_len(&self) -> usize {
        self.filled
    }

    /// Returns a shared reference to the filled portion of the buffer.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.inner[..self.filled]
    }

    /// Ensures the initialized and unfilled portion of the buffer is big
    /// enough for `additional` more bytes.
    #[inline]
    pub fn initialize(&mut self, additional: usize) {
        if self.inner.len() < self.filled + additional {
            self.inner.resize(self.filled + additional, 0);
        }
    }

    /// Returns a mutable reference to the first n bytes of the unfilled part
    /// of the buffer, allocating additional memory as necessary.
    #[inline]
    pub fn unfilled_to(&mut self, n: usize) -> &mut [u8] {
        self.initialize(n);
        &mut self.inner[self.filled..self.filled + n]
    }

    #[inline]
    pub fn write_slice(&mut self, slice: &[u8]) {
        let n = slice.len();
        self.initialize(n);
        self.inner[self.filled..self.filled + n].copy_from_slice(slice);
        self.filled += n;
    }

    /// Set the filled cursor to the very beginning of the buffer.
    ///
    /// If the buffer grew big, it is shrunk in order to reclaim memory.
    #[inline]
    pub fn clear(&mut self) {
        self.filled = 0;
        self.inner.shrink_to(MAX_CAPACITY_WHEN_CLEARED);
    }

    /// Advances the buffer’s cursor of `len` bytes.
    #[inline]
    pub fn advance(&mut self, len: usize) {
        self.filled += len;
        debug_assert!(self.filled <= self.inner.len());
    }
}

impl Default for WriteBuf {
    fn default() -> Self {
        Self::new()
    }
}

// Allows the user to get a slice of the filled region using indexing
// operations (e.g.: buf[..], buf[..10], buf[2..8]).

impl Index<Range<usize>> for WriteBuf {
    type Output = [u8];

    #[inline]
    fn index(&self, range: Range<usize>) -> &Self::Output {
        &self.filled()[range]
    }
}

impl Index<RangeFrom<usize>> for WriteBuf {
    type Output = [u8];

    #[inline]
    fn index(&self, range: RangeFrom<usize>) -> &Self::Output {
        &self.filled()[range]
    }
}

impl Index<RangeFull> for WriteBuf {
    type Output = [u8];

    #[inline]
    fn index(&self, _: RangeFull) -> &Self::Output {
        self.filled()
    }
}

impl Index<RangeTo<usize>> for WriteBuf {
    type Output = [u8];

    #[inline]
    fn index(&self, range: RangeTo<usize>) -> &Self::Output {
        &self.filled()[range]
    }
}
