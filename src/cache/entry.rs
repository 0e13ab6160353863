//! Cache Entry Module
//!
//! Defines the metadata record describing one cached artifact.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Format version written into new entries. Entries carrying any other
/// version are treated as misses and purged.
pub const FORMAT_VERSION: u32 = 1;

// == Cache Entry ==
/// Metadata for a single cached artifact.
///
/// The artifact payload itself lives in the durable tier at `location`;
/// the entry only describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The caller-supplied key, unique per entry
    pub key: String,
    /// Artifact filename relative to the cache root
    pub location: String,
    /// Artifact width in pixels
    pub width: u32,
    /// Artifact height in pixels
    pub height: u32,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last access timestamp (Unix milliseconds), refreshed on load hits
    pub last_accessed_at: u64,
    /// Entry format version
    pub format_version: u32,
    /// Payload size in bytes
    pub size_bytes: u64,
    /// Integrity digest of the payload
    pub checksum: String,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(
        key: impl Into<String>,
        location: impl Into<String>,
        width: u32,
        height: u32,
        size_bytes: u64,
        checksum: impl Into<String>,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            key: key.into(),
            location: location.into(),
            width,
            height,
            created_at: now,
            last_accessed_at: now,
            format_version: FORMAT_VERSION,
            size_bytes,
            checksum: checksum.into(),
        }
    }

    // == Is Valid ==
    /// Checks whether the entry may be surfaced to callers.
    ///
    /// Invalid entries (empty key or location, zero dimensions, or a
    /// format version other than the current one) are treated as cache
    /// misses and purged.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
            && !self.location.is_empty()
            && self.width > 0
            && self.height > 0
            && self.format_version == FORMAT_VERSION
    }

    // == Touch ==
    /// Refreshes the last-access timestamp.
    pub fn touch(&mut self) {
        self.last_accessed_at = current_timestamp_ms();
    }

    // == Age ==
    /// Milliseconds since the entry was last accessed, as seen at `now`.
    ///
    /// Saturates to zero if `now` is behind the recorded access time
    /// (clock adjustments).
    pub fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_accessed_at)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
