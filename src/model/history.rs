//! Fixed-capacity FIFO buffer.

use std::collections::VecDeque;

/// Bounded history of recent values. Pushing at capacity evicts the oldest
/// value and hands it back so callers can keep running aggregates in sync.
#[derive(Debug, Clone)]
pub struct RingHistory<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RingHistory<T> {
    /// Create an empty history. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, returning the evicted one when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent value.
    pub fn last(&self) -> Option<T> {
        self.buf.back().copied()
    }

    /// Value `n` steps back from the newest (`0` is the newest).
    pub fn nth_back(&self, n: usize) -> Option<T> {
        let len = self.buf.len();
        if n >= len {
            return None;
        }
        self.buf.get(len - 1 - n).copied()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.buf.iter().copied()
    }
}
