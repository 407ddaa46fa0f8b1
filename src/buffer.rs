//! Growing byte queue for incremental appends.

use bytes::{BufMut, BytesMut};

/// Consumed prefix length that triggers compaction of the backing buffer.
const COMPACT_THRESHOLD: usize = 256 * 1024;

/// Append-only byte queue with a consumed watermark.
///
/// Bytes arrive in arbitrarily sized chunks and are consumed in whole-box
/// units. The queue tracks the absolute stream offset of its first
/// unconsumed byte so chunk-offset arithmetic (stco, base-data-offset)
/// works regardless of how the stream was chunked.
#[derive(Debug, Default)]
pub struct ByteQueue {
    buf: BytesMut,
    head: usize,
    head_offset: u64,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the tail.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Unconsumed bytes, oldest first.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute stream offset of the first unconsumed byte.
    pub fn head_offset(&self) -> u64 {
        self.head_offset
    }

    /// Mark `n` bytes consumed and compact once the dead prefix grows.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.head += n;
        self.head_offset += n as u64;
        if self.head >= COMPACT_THRESHOLD {
            let _ = self.buf.split_to(self.head);
            self.head = 0;
        }
    }

    /// Discard everything, including partially buffered bytes, and restart
    /// offset accounting from zero.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.head_offset = 0;
    }
}
