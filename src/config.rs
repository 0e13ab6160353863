//! Configuration Module
//!
//! Handles cache tuning parameters with env-var overrides.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cache configuration parameters.
///
/// The cache root is always supplied explicitly (one cache instance per
/// root directory); every other knob has a sensible default that can be
/// overridden via environment variables.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding artifact files and the index file
    pub cache_root: PathBuf,
    /// Maximum number of entries held in the memory tier
    pub max_memory_entries: usize,
    /// Maximum size of a single artifact in bytes
    pub max_artifact_size: u64,
    /// Maximum aggregate size of the durable tier in bytes
    pub max_total_size: u64,
    /// Maximum number of simultaneous durable-store mutations
    pub max_concurrent_ops: usize,
    /// Bounded wait for a concurrency slot
    pub acquire_timeout: Duration,
    /// Attempts per durable operation (first try included)
    pub max_retry_attempts: u32,
    /// Base delay between retries; attempt N waits N times this
    pub retry_delay: Duration,
    /// Minimum time between maintenance runs
    pub maintenance_interval: Duration,
    /// Age after which an unused durable entry expires
    pub expiry_age: Duration,
}

impl CacheConfig {
    /// Creates a configuration with default tuning for the given root.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            max_memory_entries: 64,
            max_artifact_size: 10 * 1024 * 1024,
            max_total_size: 100 * 1024 * 1024,
            max_concurrent_ops: 4,
            acquire_timeout: Duration::from_millis(5000),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            maintenance_interval: Duration::from_secs(24 * 60 * 60),
            expiry_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Creates a configuration for the given root, letting environment
    /// variables override individual knobs.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_MEMORY_ENTRIES` - Memory tier bound (default: 64)
    /// - `CACHE_MAX_ARTIFACT_SIZE` - Per-artifact byte limit (default: 10 MiB)
    /// - `CACHE_MAX_TOTAL_SIZE` - Durable tier byte cap (default: 100 MiB)
    /// - `CACHE_MAX_CONCURRENT_OPS` - Simultaneous writes (default: 4)
    /// - `CACHE_ACQUIRE_TIMEOUT_MS` - Slot wait in ms (default: 5000)
    /// - `CACHE_MAX_RETRY_ATTEMPTS` - Attempts per operation (default: 3)
    /// - `CACHE_RETRY_DELAY_MS` - Base retry delay in ms (default: 100)
    /// - `CACHE_MAINTENANCE_INTERVAL_SECS` - Seconds between runs (default: 86400)
    /// - `CACHE_EXPIRY_AGE_SECS` - Unused-entry lifetime in seconds (default: 604800)
    pub fn from_env(cache_root: impl Into<PathBuf>) -> Self {
        let defaults = Self::new(cache_root);
        Self {
            max_memory_entries: env_parse("CACHE_MAX_MEMORY_ENTRIES")
                .unwrap_or(defaults.max_memory_entries),
            max_artifact_size: env_parse("CACHE_MAX_ARTIFACT_SIZE")
                .unwrap_or(defaults.max_artifact_size),
            max_total_size: env_parse("CACHE_MAX_TOTAL_SIZE").unwrap_or(defaults.max_total_size),
            max_concurrent_ops: env_parse("CACHE_MAX_CONCURRENT_OPS")
                .unwrap_or(defaults.max_concurrent_ops),
            acquire_timeout: env_parse("CACHE_ACQUIRE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.acquire_timeout),
            max_retry_attempts: env_parse("CACHE_MAX_RETRY_ATTEMPTS")
                .unwrap_or(defaults.max_retry_attempts),
            retry_delay: env_parse("CACHE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            maintenance_interval: env_parse("CACHE_MAINTENANCE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.maintenance_interval),
            expiry_age: env_parse("CACHE_EXPIRY_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.expiry_age),
            ..defaults
        }
    }
}

/// Reads and parses an environment variable, None if absent or malformed.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
