//! Fixed-capacity lossy byte ring.
//!
//! Each consumer gets its own ring. The capture side writes, the consumer
//! reads, and neither ever waits on the other: when the consumer falls behind
//! the oldest unread bytes are overwritten, so the ring always holds a sliding
//! window over the most recent `capacity` bytes.

use thiserror::Error;

use super::transform::{InputTransform, TransformError};

/// Errors from writing into a [`RingBuffer`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// A single write can never exceed the total capacity.
    #[error("write of {len} bytes exceeds ring capacity of {capacity} bytes")]
    CapacityExceeded { len: usize, capacity: usize },

    /// The write-time transform rejected the chunk.
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// A pull-based byte source.
///
/// `read` copies up to `out.len()` bytes and returns how many were copied.
/// Returning 0 means "nothing available right now", never end-of-stream.
pub trait ByteSource {
    fn read(&mut self, out: &mut [u8]) -> usize;
}

/// Circular byte store with a write-time transform.
pub struct RingBuffer {
    data: Box<[u8]>,
    fill_level: usize,
    /// Next byte to be overwritten.
    write_cursor: usize,
    transform: Box<dyn InputTransform>,
}

impl RingBuffer {
    /// Creates an empty ring of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, transform: Box<dyn InputTransform>) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            fill_level: 0,
            write_cursor: 0,
            transform,
        }
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn fill_level(&self) -> usize {
        self.fill_level
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fill_level == 0
    }

    /// Discards all content and rewinds the cursors.
    pub fn reset(&mut self) {
        self.fill_level = 0;
        self.write_cursor = 0;
    }

    /// Transforms and stores `chunk`, overwriting the oldest unread bytes if
    /// needed. Never blocks.
    ///
    /// On error nothing is stored.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), BufferError> {
        let capacity = self.data.len();
        if chunk.len() > capacity {
            return Err(BufferError::CapacityExceeded {
                len: chunk.len(),
                capacity,
            });
        }

        let bytes = self.transform.transform(chunk)?;
        let len = bytes.len();
        let start = self.write_cursor;

        if start + len > capacity {
            // Tail of the ring, then wrap to the head.
            let first = capacity - start;
            self.data[start..].copy_from_slice(&bytes[..first]);
            self.data[..len - first].copy_from_slice(&bytes[first..]);
        } else {
            self.data[start..start + len].copy_from_slice(bytes);
        }

        self.fill_level = (self.fill_level + len).min(capacity);
        self.write_cursor = (start + len) % capacity;
        Ok(())
    }

    /// Copies up to `out.len()` of the oldest unread bytes into `out`.
    ///
    /// Returns the number of bytes copied; 0 when the ring is empty.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let capacity = self.data.len();
        let count = out.len().min(self.fill_level);
        if count == 0 {
            return 0;
        }

        let read_start = (self.write_cursor + capacity - self.fill_level) % capacity;
        if read_start + count > capacity {
            let first = capacity - read_start;
            out[..first].copy_from_slice(&self.data[read_start..]);
            out[first..count].copy_from_slice(&self.data[..count - first]);
        } else {
            out[..count].copy_from_slice(&self.data[read_start..read_start + count]);
        }

        self.fill_level -= count;
        count
    }
}

impl ByteSource for RingBuffer {
    fn read(&mut self, out: &mut [u8]) -> usize {
        RingBuffer::read(self, out)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.data.len())
            .field("fill_level", &self.fill_level)
            .field("write_cursor", &self.write_cursor)
            .finish()
    }
}
