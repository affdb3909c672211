//! Fixed-capacity circular store addressed by absolute position.
//!
//! Every element ever written gets a position equal to the number of elements
//! written before it. Positions never reset, so a reader can keep its own
//! cursor across any number of wraps and compare it with [`RingBuffer::latest`]
//! to learn how far behind it is.

use crate::{BeatMatrixError, Result};

/// Outcome of a positioned read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSpan {
    /// Elements copied into the destination.
    pub copied: usize,
    /// Position to continue from on the next call.
    pub next: u64,
}

/// Circular buffer with a monotonic write cursor.
///
/// The buffer itself is not synchronised; share it behind a lock such as
/// [`crate::SyncPoint`]. The intended discipline is one writer and one reader.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Box<[T]>,
    latest: u64,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Allocates the backing store. The capacity is fixed for the buffer's lifetime.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BeatMatrixError::config(
                "ring buffer capacity must be greater than 0",
            ));
        }

        Ok(Self {
            data: vec![T::default(); capacity].into_boxed_slice(),
            latest: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Total number of elements ever written.
    pub fn latest(&self) -> u64 {
        self.latest
    }

    /// Oldest position still held in the buffer.
    pub fn oldest(&self) -> u64 {
        self.latest.saturating_sub(self.data.len() as u64)
    }

    /// Number of elements currently held.
    pub fn len(&self) -> usize {
        (self.latest - self.oldest()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.latest == 0
    }

    /// Appends `data`, overwriting the oldest elements once the buffer is full.
    pub fn write(&mut self, data: &[T]) {
        let capacity = self.data.len();
        // Only the tail of an oversized write survives.
        let skipped = data.len().saturating_sub(capacity);
        let tail = &data[skipped..];
        let start = ((self.latest + skipped as u64) % capacity as u64) as usize;

        let first = tail.len().min(capacity - start);
        self.data[start..start + first].copy_from_slice(&tail[..first]);
        self.data[..tail.len() - first].copy_from_slice(&tail[first..]);

        self.latest += data.len() as u64;
    }

    /// Copies up to `dest.len()` elements starting at absolute position `pos`.
    ///
    /// The copy is clipped at [`RingBuffer::latest`]; nothing is copied when
    /// `pos` is at or past it. Positions older than [`RingBuffer::oldest`] have
    /// been overwritten and yield [`BeatMatrixError::Overrun`].
    pub fn read_at(&self, pos: u64, dest: &mut [T]) -> Result<ReadSpan> {
        let oldest = self.oldest();
        if pos < oldest {
            return Err(BeatMatrixError::Overrun {
                position: pos,
                oldest,
            });
        }

        let available = self.latest.saturating_sub(pos);
        let copied = (dest.len() as u64).min(available) as usize;
        if copied == 0 {
            return Ok(ReadSpan { copied, next: pos });
        }

        let capacity = self.data.len();
        let start = (pos % capacity as u64) as usize;
        let first = copied.min(capacity - start);
        dest[..first].copy_from_slice(&self.data[start..start + first]);
        dest[first..copied].copy_from_slice(&self.data[..copied - first]);

        Ok(ReadSpan {
            copied,
            next: pos + copied as u64,
        })
    }

    /// Copies the freshest `dest.len()` elements (or fewer if not yet written).
    pub fn read(&self, dest: &mut [T]) -> usize {
        let wanted = dest.len().min(self.len());
        let pos = self.latest - wanted as u64;
        match self.read_at(pos, &mut dest[..wanted]) {
            Ok(span) => span.copied,
            Err(_) => 0,
        }
    }
}
