//! File Backend Module
//!
//! Production storage backend writing one artifact file per entry under
//! the cache root, with atomic replace semantics.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::backend::{verify_checksum, StorageBackend};
use crate::error::{CacheError, Result};

/// Suffix marking in-flight writes. Files carrying it are never read as
/// artifacts and are swept as orphans by maintenance if a crash strands
/// them.
const TEMP_SUFFIX: &str = ".tmp";

/// Distinguishes temp files of concurrent writes within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == File Backend ==
/// Stores artifacts as individual files in a single directory.
///
/// Writes go to a uniquely named temp file in the same directory, are
/// flushed to disk, then renamed over the final location. A reader at any
/// instant sees the old payload, the new payload, or nothing — never a
/// truncated file. Every write starts from a fresh temp file; nothing
/// resumes a leftover from a failed attempt.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    max_artifact_size: u64,
}

impl FileBackend {
    /// Creates a backend rooted at `root`, creating the directory if
    /// needed.
    pub async fn open(root: impl Into<PathBuf>, max_artifact_size: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            max_artifact_size,
        })
    }

    fn path_for(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    fn temp_path_for(&self, location: &str) -> PathBuf {
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        self.root
            .join(format!("{location}.{pid}-{seq}{TEMP_SUFFIX}"))
    }

    async fn write_temp(temp: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn write(&self, location: &str, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.max_artifact_size {
            return Err(CacheError::Capacity {
                size: bytes.len() as u64,
                max: self.max_artifact_size,
            });
        }

        let temp = self.temp_path_for(location);
        if let Err(err) = Self::write_temp(&temp, bytes).await {
            // The final location is untouched; only the temp may linger
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp, self.path_for(location)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        debug!(location, size = bytes.len(), "artifact written");
        Ok(())
    }

    async fn read(
        &self,
        location: &str,
        expected_checksum: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let bytes = match fs::read(self.path_for(location)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        verify_checksum(location, &bytes, expected_checksum)?;
        Ok(Some(bytes))
    }

    async fn exists(&self, location: &str) -> bool {
        fs::try_exists(self.path_for(location)).await.unwrap_or(false)
    }

    async fn remove(&self, location: &str) -> Result<()> {
        match fs::remove_file(self.path_for(location)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut locations = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_file() {
                continue;
            }
            if let Ok(name) = item.file_name().into_string() {
                locations.push(name);
            }
        }
        Ok(locations)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hashing::payload_checksum;
    use tempfile::TempDir;

    async fn open_backend(root: &Path) -> FileBackend {
        FileBackend::open(root, 1024 * 1024).await.unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        backend.write("a.bin", b"payload").await.unwrap();
        let bytes = backend.read("a.bin", None).await.unwrap().unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn test_write_replaces_previous_payload() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        backend.write("a.bin", b"first").await.unwrap();
        backend.write("a.bin", b"second").await.unwrap();

        let bytes = backend.read("a.bin", None).await.unwrap().unwrap();
        assert_eq!(bytes, b"second");
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        backend.write("a.bin", b"payload").await.unwrap();
        backend.write("a.bin", b"payload again").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|name| name.ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_capacity_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path(), 8).await.unwrap();

        let result = backend.write("a.bin", &[0u8; 9]).await;
        assert!(matches!(result, Err(CacheError::Capacity { .. })));
        assert!(!backend.exists("a.bin").await);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_read_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;
        assert!(backend.read("missing.bin", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        let payload = vec![42u8; 256];
        let checksum = payload_checksum(&payload);
        backend.write("a.bin", &payload).await.unwrap();

        // Flip one byte on disk behind the backend's back
        let path = dir.path().join("a.bin");
        let mut on_disk = std::fs::read(&path).unwrap();
        on_disk[17] ^= 0xff;
        std::fs::write(&path, &on_disk).unwrap();

        let result = backend.read("a.bin", Some(&checksum)).await;
        assert!(matches!(result, Err(CacheError::Corruption { .. })));
    }

    #[tokio::test]
    async fn test_stray_temp_file_never_shadows_artifact() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        let payload = b"committed payload".to_vec();
        let checksum = payload_checksum(&payload);
        backend.write("a.bin", &payload).await.unwrap();

        // Simulate a crash that stranded a half-written temp file
        std::fs::write(dir.path().join("a.bin.99-99.tmp"), b"partial").unwrap();

        let bytes = backend.read("a.bin", Some(&checksum)).await.unwrap().unwrap();
        assert_eq!(bytes, payload);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        backend.write("a.bin", b"payload").await.unwrap();
        backend.remove("a.bin").await.unwrap();
        backend.remove("a.bin").await.unwrap();
        assert!(!backend.exists("a.bin").await);
    }

    #[tokio::test]
    async fn test_list_includes_stray_files() {
        let dir = TempDir::new().unwrap();
        let backend = open_backend(dir.path()).await;

        backend.write("a.bin", b"payload").await.unwrap();
        std::fs::write(dir.path().join("b.bin.1-1.tmp"), b"partial").unwrap();

        let mut locations = backend.list().await.unwrap();
        locations.sort();
        assert_eq!(locations, vec!["a.bin", "b.bin.1-1.tmp"]);
    }
}
