//! Memory Tier Module
//!
//! Bounded in-process cache of entry metadata for hot-path lookups.

use std::collections::HashMap;

use super::entry::CacheEntry;
use super::lru::AccessTracker;

// == Memory Tier ==
/// Bounded, LRU-ordered map of hot entries.
///
/// Holds metadata only; artifact payloads stay in the durable tier.
/// Evicting an entry here never touches the durable tier — the artifact
/// remains loadable through a miss-then-fallback on a later lookup.
#[derive(Debug)]
pub struct MemoryTier {
    /// Hot entry metadata by key
    entries: HashMap<String, CacheEntry>,
    /// Access-order tracker driving eviction
    tracker: AccessTracker,
    /// Maximum number of entries held
    max_entries: usize,
}

impl MemoryTier {
    // == Constructor ==
    /// Creates an empty tier bounded to `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            tracker: AccessTracker::new(),
            max_entries: max_entries.max(1),
        }
    }

    // == Get ==
    /// Looks up an entry, refreshing its access order on hit.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        if self.entries.contains_key(key) {
            self.tracker.touch(key);
        }
        self.entries.get(key)
    }

    // == Put ==
    /// Inserts or replaces an entry, then trims back to capacity.
    ///
    /// Returns the number of entries evicted by the trim.
    pub fn put(&mut self, entry: CacheEntry) -> usize {
        self.tracker.touch(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        self.trim_to_capacity()
    }

    // == Remove ==
    /// Drops an entry. Unknown keys are ignored.
    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.tracker.remove(key);
    }

    // == Contains ==
    /// Checks presence without disturbing the access order.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Count ==
    /// Number of entries currently held.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    // == Clear ==
    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tracker.clear();
    }

    // == Trim ==
    /// Evicts least-recently-used entries until within the bound.
    fn trim_to_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.max_entries {
            match self.tracker.evict_oldest() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    evicted += 1;
                }
                // Tracker and map always hold the same key set
                None => break,
            }
        }
        evicted
    }
}
