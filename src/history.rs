//! Search History
//!
//! Bounded FIFO of recent queries kept for replay. In-memory only.

use crate::models::{PersonType, QueryKind, SearchHistoryEntry};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

pub struct SearchHistory {
    capacity: usize,
    entries: Mutex<VecDeque<SearchHistoryEntry>>,
}

impl SearchHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SearchHistoryEntry>> {
        // A panic mid-push leaves the deque intact, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(
        &self,
        identifier: &str,
        query_kind: QueryKind,
        found: bool,
        person_type: Option<PersonType>,
    ) {
        self.push(SearchHistoryEntry {
            identifier: identifier.trim().to_string(),
            query_kind,
            timestamp: Utc::now(),
            found,
            person_type,
        });
    }

    pub fn push(&self, entry: SearchHistoryEntry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<SearchHistoryEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<SearchHistoryEntry> {
        self.lock().back().cloned()
    }

    /// Identifiers to offer for replay, newest first, without repeats.
    pub fn replay_candidates(&self) -> Vec<String> {
        let entries = self.lock();
        let mut seen = Vec::new();
        for entry in entries.iter().rev() {
            if !seen.contains(&entry.identifier) {
                seen.push(entry.identifier.clone());
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for SearchHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
