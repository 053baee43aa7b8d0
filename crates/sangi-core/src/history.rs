//! Bounded, newest-first history buffers.

use std::collections::VecDeque;

/// Maximum number of entries kept in the message history.
pub const MAX_MESSAGES: usize = 50;

/// Maximum number of entries kept in the device log history.
pub const MAX_LOG_LINES: usize = 500;

// ── History<T> ───────────────────────────────────────────────────────────────

/// A fixed-capacity history that keeps the newest entry at the front and
/// evicts the oldest entry when full.
#[derive(Debug, Clone, PartialEq)]
pub struct History<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    /// Create a new history with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a value as the newest entry, evicting the oldest if at capacity.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_back();
        }
        self.buf.push_front(value);
    }

    /// Number of items currently stored.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over items from newest to oldest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.buf.iter()
    }

    /// Get the most recently inserted item.
    pub fn latest(&self) -> Option<&T> {
        self.buf.front()
    }

    /// Get the oldest item still retained.
    pub fn oldest(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Clear all items.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
