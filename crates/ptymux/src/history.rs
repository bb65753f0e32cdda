//! Bounded output history kept per session
//!
//! Stores the most recent bytes a session produced so the screen can be
//! repainted when the operator switches back to it.

use std::collections::VecDeque;

/// A fixed-capacity byte buffer that evicts the oldest bytes first.
#[derive(Debug, Clone)]
pub struct History {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `data`, discarding the oldest bytes if the capacity would be exceeded.
    pub fn append(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        if data.len() >= self.capacity {
            self.buf.clear();
            self.buf.extend(&data[data.len() - self.capacity..]);
            return;
        }

        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    /// Retained bytes, oldest first.
    pub fn to_vec(&self) -> Vec<u8> {
        let (front, back) = self.buf.as_slices();
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        out
    }

    /// Retained bytes as the two contiguous halves of the ring, oldest first.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        self.buf.as_slices()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
