//! Bounded mutation history

use lexis_core::HistoryEntry;
use std::collections::VecDeque;

/// Ring buffer of committed mutations, oldest evicted first
#[derive(Debug, Clone)]
pub struct MutationHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl MutationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest once the cap is reached
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Replace the whole ledger, keeping the newest `capacity` entries
    pub fn replace(&mut self, entries: Vec<HistoryEntry>) {
        let skip = entries.len().saturating_sub(self.capacity);
        self.entries = entries.into_iter().skip(skip).collect();
    }

    /// Entries oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Entries recorded for a path, oldest first
    pub fn for_path(&self, path: &str) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.path == path)
            .cloned()
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for MutationHistory {
    fn default() -> Self {
        Self::new(50)
    }
}
