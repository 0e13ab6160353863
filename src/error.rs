//! Error types for the artifact cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
///
/// None of these variants cross the public API boundary: `ArtifactCache`
/// logs them internally and reports plain success flags or optional values.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Transient I/O failure (file lock, temporary unavailability).
    /// Eligible for retry.
    #[error("transient I/O failure: {0}")]
    Transient(#[from] std::io::Error),

    /// Stored artifact failed integrity verification. Never retried;
    /// the stale entry is purged from both tiers.
    #[error("corrupt artifact at {location}: expected checksum {expected}, got {actual}")]
    Corruption {
        location: String,
        expected: String,
        actual: String,
    },

    /// Artifact exceeds the configured size limit. Rejected before any
    /// write is attempted.
    #[error("artifact of {size} bytes exceeds limit of {max} bytes")]
    Capacity { size: u64, max: u64 },

    /// A concurrency slot could not be acquired within the bounded wait.
    #[error("timed out after {waited_ms}ms waiting for a storage slot")]
    GateTimeout { waited_ms: u64 },

    /// Entry metadata failed validation (empty key, zero dimensions,
    /// unsupported format version).
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// Index snapshot could not be serialized or deserialized.
    #[error("index serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    // == Retry Classification ==
    /// Returns true for failures worth retrying from scratch.
    ///
    /// Only file I/O is considered transient. Corruption, capacity and
    /// gate timeouts are final on first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Transient(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
