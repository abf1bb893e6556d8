use std::collections::VecDeque;

use crate::types::HistoryEntry;

/// Per-sensor ring buffer of recent readings, in arrival order.
/// Oldest entries are evicted once the buffer is full.
#[derive(Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting the oldest entry when full.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        // Exceeding capacity is a logic defect, not a recoverable condition.
        assert!(
            self.entries.len() <= self.capacity,
            "history buffer exceeded capacity {}",
            self.capacity
        );
    }

    /// Full copy, oldest first. Taken when an alert is built.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
