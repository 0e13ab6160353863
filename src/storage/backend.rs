//! Storage Backend Module
//!
//! The seam between the cache and its durable tier. The file backend is
//! the production implementation; the memory backend is an interchangeable
//! strategy used by tests that exercise cache logic without touching disk.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::hashing::payload_checksum;
use crate::error::{CacheError, Result};

// == Storage Backend Trait ==
/// Durable artifact storage.
///
/// Locations are opaque file names relative to the backend's root. A
/// `write` is atomic: a concurrent `read` of the same location observes
/// either the previous payload in full, the new payload in full, or
/// absence — never a partial file.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Stores a payload at `location`, replacing any previous payload
    /// atomically. Payloads above the backend's size limit are rejected
    /// with [`CacheError::Capacity`] before any storage is touched.
    async fn write(&self, location: &str, bytes: &[u8]) -> Result<()>;

    /// Reads the payload at `location`.
    ///
    /// Returns `Ok(None)` when the location is absent. When
    /// `expected_checksum` is given and the stored payload does not match,
    /// fails with [`CacheError::Corruption`]; the caller purges the stale
    /// entry and treats the lookup as a miss.
    async fn read(&self, location: &str, expected_checksum: Option<&str>)
        -> Result<Option<Vec<u8>>>;

    /// Whether a payload exists at `location`.
    async fn exists(&self, location: &str) -> bool;

    /// Deletes the payload at `location`, if any. Absence is not an error.
    async fn remove(&self, location: &str) -> Result<()>;

    /// Lists every stored location, including leftovers the cache no
    /// longer describes (used by the maintenance orphan sweep).
    async fn list(&self) -> Result<Vec<String>>;
}

/// Verifies a payload against an expected digest, shared by backends.
pub(crate) fn verify_checksum(
    location: &str,
    bytes: &[u8],
    expected_checksum: Option<&str>,
) -> Result<()> {
    let Some(expected) = expected_checksum else {
        return Ok(());
    };
    let actual = payload_checksum(bytes);
    if actual != expected {
        warn!(
            location,
            expected,
            actual = %actual,
            "artifact failed integrity verification"
        );
        return Err(CacheError::Corruption {
            location: location.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

// == Memory Backend ==
/// In-memory [`StorageBackend`] strategy for tests.
///
/// Mirrors the file backend's observable contract (capacity rejection,
/// checksum verification, idempotent removal) over a plain map.
#[derive(Debug)]
pub struct MemoryBackend {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    max_artifact_size: u64,
}

impl MemoryBackend {
    /// Creates an empty backend with the given per-payload size limit.
    pub fn new(max_artifact_size: u64) -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            max_artifact_size,
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn write(&self, location: &str, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.max_artifact_size {
            return Err(CacheError::Capacity {
                size: bytes.len() as u64,
                max: self.max_artifact_size,
            });
        }
        self.payloads
            .lock()
            .await
            .insert(location.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(
        &self,
        location: &str,
        expected_checksum: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let bytes = match self.payloads.lock().await.get(location) {
            Some(bytes) => bytes.clone(),
            None => return Ok(None),
        };
        verify_checksum(location, &bytes, expected_checksum)?;
        Ok(Some(bytes))
    }

    async fn exists(&self, location: &str) -> bool {
        self.payloads.lock().await.contains_key(location)
    }

    async fn remove(&self, location: &str) -> Result<()> {
        self.payloads.lock().await.remove(location);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.payloads.lock().await.keys().cloned().collect())
    }
}
