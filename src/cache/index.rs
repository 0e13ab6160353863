//! Index Persistence Module
//!
//! The index file is the sole persisted description of what the durable
//! tier should contain. It is rewritten after every mutating operation
//! and reloaded on startup to rebuild the memory tier.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::{CacheEntry, FORMAT_VERSION};
use crate::error::Result;
use crate::storage::StorageBackend;

/// Location of the index file within the cache root.
pub const INDEX_LOCATION: &str = "index.json";

// == Index Snapshot ==
/// Versioned snapshot of every entry the durable tier should contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Snapshot format version
    pub format_version: u32,
    /// All entries, one per durable artifact
    pub entries: Vec<CacheEntry>,
    /// Aggregate artifact size in bytes
    pub total_size_bytes: u64,
    /// When maintenance last ran (Unix milliseconds)
    pub last_cleanup_at: u64,
    /// When this snapshot was written (RFC 3339, informational)
    pub saved_at: String,
}

// == Index File ==
/// Reads and writes the index snapshot through the storage backend, so
/// index writes get the same atomic replace semantics as artifacts.
#[derive(Debug)]
pub struct IndexFile {
    backend: Arc<dyn StorageBackend>,
}

impl IndexFile {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    // == Load ==
    /// Loads and heals the persisted index.
    ///
    /// A missing, unreadable, or version-incompatible index yields an
    /// empty snapshot: total loss of the index degrades the cache to
    /// always-miss, it never fails the open. Listed entries are validated
    /// and checked against the backing store; entries that are invalid or
    /// whose artifact is gone are silently dropped.
    pub async fn load(&self) -> Result<CacheIndex> {
        let raw = match self.backend.read(INDEX_LOCATION, None).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("no index file, starting with an empty cache");
                return Ok(Self::empty());
            }
            Err(err) => {
                warn!(error = %err, "index unreadable, starting with an empty cache");
                return Ok(Self::empty());
            }
        };

        let mut parsed: CacheIndex = match serde_json::from_slice(&raw) {
            Ok(index) => index,
            Err(err) => {
                warn!(error = %err, "index corrupt, starting with an empty cache");
                return Ok(Self::empty());
            }
        };
        if parsed.format_version != FORMAT_VERSION {
            warn!(
                found = parsed.format_version,
                supported = FORMAT_VERSION,
                "index format version unsupported, discarding"
            );
            return Ok(Self::empty());
        }

        let listed = parsed.entries.len();
        let mut entries = Vec::with_capacity(listed);
        for entry in std::mem::take(&mut parsed.entries) {
            if !entry.is_valid() {
                warn!(key = %entry.key, "dropping invalid index entry");
                continue;
            }
            if !self.backend.exists(&entry.location).await {
                warn!(
                    key = %entry.key,
                    location = %entry.location,
                    "dropping index entry with missing artifact"
                );
                continue;
            }
            entries.push(entry);
        }
        if entries.len() < listed {
            debug!(
                kept = entries.len(),
                listed, "index healed on load"
            );
        }

        let total_size_bytes = entries.iter().map(|e| e.size_bytes).sum();
        Ok(CacheIndex {
            entries,
            total_size_bytes,
            ..parsed
        })
    }

    // == Save ==
    /// Persists a snapshot of the given entries.
    pub async fn save(&self, entries: Vec<CacheEntry>, last_cleanup_at: u64) -> Result<()> {
        let index = CacheIndex {
            format_version: FORMAT_VERSION,
            total_size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            entries,
            last_cleanup_at,
            saved_at: Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_vec_pretty(&index)?;
        self.backend.write(INDEX_LOCATION, &raw).await
    }

    fn empty() -> CacheIndex {
        CacheIndex {
            format_version: FORMAT_VERSION,
            entries: Vec::new(),
            total_size_bytes: 0,
            last_cleanup_at: 0,
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn entry(key: &str, size: u64) -> CacheEntry {
        CacheEntry::new(key, format!("{key}.bin"), 16, 16, size, "cafe")
    }

    fn index_file() -> (Arc<MemoryBackend>, IndexFile) {
        let backend = Arc::new(MemoryBackend::new(1024 * 1024));
        let index = IndexFile::new(backend.clone());
        (backend, index)
    }

    #[tokio::test]
    async fn test_load_missing_index_is_empty() {
        let (_backend, index) = index_file();
        let loaded = index.load().await.unwrap();
        assert!(loaded.entries.is_empty());
        assert_eq!(loaded.total_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let (backend, index) = index_file();
        backend.write("a.bin", b"aaaa").await.unwrap();
        backend.write("b.bin", b"bbbbbbbb").await.unwrap();

        index
            .save(vec![entry("a", 4), entry("b", 8)], 12345)
            .await
            .unwrap();

        let loaded = index.load().await.unwrap();
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.total_size_bytes, 12);
        assert_eq!(loaded.last_cleanup_at, 12345);
    }

    #[tokio::test]
    async fn test_load_drops_entries_with_missing_artifacts() {
        let (backend, index) = index_file();
        backend.write("a.bin", b"aaaa").await.unwrap();

        // "b" is listed but its artifact was deleted out from under us
        index
            .save(vec![entry("a", 4), entry("b", 8)], 0)
            .await
            .unwrap();

        let loaded = index.load().await.unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].key, "a");
        assert_eq!(loaded.total_size_bytes, 4);
    }

    #[tokio::test]
    async fn test_load_drops_invalid_entries() {
        let (backend, index) = index_file();
        backend.write("a.bin", b"aaaa").await.unwrap();
        backend.write("z.bin", b"zzzz").await.unwrap();

        let mut bad = entry("z", 4);
        bad.width = 0;
        index.save(vec![entry("a", 4), bad], 0).await.unwrap();

        let loaded = index.load().await.unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].key, "a");
    }

    #[tokio::test]
    async fn test_load_garbled_index_is_empty() {
        let (backend, index) = index_file();
        backend.write(INDEX_LOCATION, b"not json {").await.unwrap();

        let loaded = index.load().await.unwrap();
        assert!(loaded.entries.is_empty());
    }

    #[tokio::test]
    async fn test_load_unsupported_version_is_empty() {
        let (backend, index) = index_file();
        backend.write("a.bin", b"aaaa").await.unwrap();
        index.save(vec![entry("a", 4)], 0).await.unwrap();

        // Rewrite the snapshot claiming a future format version
        let raw = backend.read(INDEX_LOCATION, None).await.unwrap().unwrap();
        let mut snapshot: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        snapshot["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
        backend
            .write(INDEX_LOCATION, snapshot.to_string().as_bytes())
            .await
            .unwrap();

        let loaded = index.load().await.unwrap();
        assert!(loaded.entries.is_empty());
    }
}
