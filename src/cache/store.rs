//! Artifact Cache Module
//!
//! The public facade composing the memory tier, durable tier, index
//! persistence, concurrency gate, maintenance and statistics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::entry::{current_timestamp_ms, CacheEntry};
use super::hashing::{payload_checksum, slot_name};
use super::index::{IndexFile, INDEX_LOCATION};
use super::memory::MemoryTier;
use super::stats::{CacheStatistics, StatsTracker};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::storage::{ConcurrencyGate, FileBackend, StorageBackend};

// == Loaded Artifact ==
/// A payload returned by [`ArtifactCache::load`].
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    /// The artifact bytes exactly as saved
    pub bytes: Vec<u8>,
    /// Artifact width in pixels
    pub width: u32,
    /// Artifact height in pixels
    pub height: u32,
}

// == Internal State ==
/// Tiers and bookkeeping guarded by the cache's single state lock.
#[derive(Debug)]
struct CacheState {
    /// Every entry the durable tier contains; the in-memory image of the
    /// persisted index
    catalog: HashMap<String, CacheEntry>,
    /// Bounded hot subset for the fast path
    memory: MemoryTier,
    /// When maintenance last ran (Unix milliseconds)
    last_cleanup_at: u64,
}

impl CacheState {
    /// Inserts or replaces an entry in both tiers. Returns the number of
    /// memory tier evictions the insert caused.
    fn upsert(&mut self, entry: CacheEntry) -> usize {
        self.catalog.insert(entry.key.clone(), entry.clone());
        self.memory.put(entry)
    }

    /// Drops an entry from both tiers.
    fn purge(&mut self, key: &str) -> Option<CacheEntry> {
        self.memory.remove(key);
        self.catalog.remove(key)
    }

    fn clear(&mut self) {
        self.memory.clear();
        self.catalog.clear();
    }

    fn total_size(&self) -> u64 {
        self.catalog.values().map(|e| e.size_bytes).sum()
    }
}

// == Artifact Cache ==
/// Two-tier artifact cache: bounded in-memory metadata over a durable
/// file store with atomic writes and integrity verification.
///
/// Construct one instance per cache root and share it as
/// `Arc<ArtifactCache>`; all methods take `&self`. No operation panics or
/// returns an error: failures are logged and reported as `false` or
/// `None`, and total loss of the durable tier degrades the cache to
/// always-miss. Concurrent processes sharing one cache root are
/// unsupported — there is no cross-process locking.
#[derive(Debug)]
pub struct ArtifactCache {
    config: CacheConfig,
    backend: Arc<dyn StorageBackend>,
    index_file: IndexFile,
    gate: ConcurrencyGate,
    state: RwLock<CacheState>,
    stats: RwLock<StatsTracker>,
    /// Per-key write locks ordering racing save/clear pairs, so the
    /// committed artifact and its catalog entry always agree
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    // == Construction ==
    /// Opens a cache over the file backend at the configured root,
    /// creating the directory and healing the persisted index.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        let backend = Arc::new(
            FileBackend::open(&config.cache_root, config.max_artifact_size).await?,
        );
        Self::with_backend(config, backend).await
    }

    /// Opens a cache over an explicit storage backend.
    pub async fn with_backend(
        config: CacheConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        let index_file = IndexFile::new(backend.clone());
        let loaded = index_file.load().await?;

        let mut catalog = HashMap::with_capacity(loaded.entries.len());
        for entry in &loaded.entries {
            catalog.insert(entry.key.clone(), entry.clone());
        }

        // Warm the memory tier with the most recently used entries,
        // inserted oldest-first so the access order comes out right
        let mut memory = MemoryTier::new(config.max_memory_entries);
        let mut by_access = loaded.entries;
        by_access.sort_by_key(|e| e.last_accessed_at);
        let skip = by_access.len().saturating_sub(config.max_memory_entries);
        for entry in by_access.into_iter().skip(skip) {
            memory.put(entry);
        }

        let gate = ConcurrencyGate::new(
            config.max_concurrent_ops,
            config.acquire_timeout,
            config.max_retry_attempts,
            config.retry_delay,
        );

        info!(
            root = %config.cache_root.display(),
            entries = catalog.len(),
            "artifact cache opened"
        );

        Ok(Self {
            config,
            backend,
            index_file,
            gate,
            state: RwLock::new(CacheState {
                catalog,
                memory,
                last_cleanup_at: loaded.last_cleanup_at,
            }),
            stats: RwLock::new(StatsTracker::new()),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    // == Save ==
    /// Stores an artifact under `key`, replacing any previous one.
    ///
    /// Returns false when the artifact could not be durably stored (too
    /// large, storage slot unavailable, retries exhausted). Keys hash to
    /// one durable slot each; in the rare event two keys collide, the
    /// later save overwrites the earlier artifact.
    pub async fn save(&self, key: &str, artifact: &[u8], width: u32, height: u32) -> bool {
        let started = Instant::now();
        let result = self.try_save(key, artifact, width, height).await;
        self.stats.write().await.record_mutation(started.elapsed());

        match result {
            Ok(evicted) => {
                if evicted > 0 {
                    self.stats.write().await.record_evictions(evicted);
                }
                self.maybe_run_maintenance().await;
                true
            }
            Err(err) => {
                warn!(key, error = %err, "save failed");
                false
            }
        }
    }

    async fn try_save(
        &self,
        key: &str,
        artifact: &[u8],
        width: u32,
        height: u32,
    ) -> Result<usize> {
        if key.is_empty() {
            return Err(CacheError::InvalidEntry("empty key".to_string()));
        }
        if width == 0 || height == 0 {
            return Err(CacheError::InvalidEntry(format!(
                "dimensions {width}x{height} must be positive"
            )));
        }
        // Reject oversized artifacts before taking a storage slot
        if artifact.len() as u64 > self.config.max_artifact_size {
            return Err(CacheError::Capacity {
                size: artifact.len() as u64,
                max: self.config.max_artifact_size,
            });
        }

        let location = slot_name(key);
        let checksum = payload_checksum(artifact);

        let _key_guard = self.lock_key(key).await;
        self.gate
            .run("save", || self.backend.write(&location, artifact))
            .await?;

        let entry = CacheEntry::new(key, location, width, height, artifact.len() as u64, checksum);
        let mut state = self.state.write().await;
        let evicted = state.upsert(entry);
        self.persist_index(&state).await?;
        Ok(evicted)
    }

    // == Load ==
    /// Retrieves the artifact saved under `key`.
    ///
    /// Consults the memory tier first and falls back to the durable tier,
    /// repopulating the memory tier on a fallback hit. A missing, invalid
    /// or corrupt artifact is purged and reported as `None`.
    pub async fn load(&self, key: &str) -> Option<LoadedArtifact> {
        let started = Instant::now();
        let outcome = self.try_load(key).await;
        let elapsed = started.elapsed();

        {
            let mut stats = self.stats.write().await;
            match &outcome {
                Ok(Some(_)) => stats.record_hit(elapsed),
                Ok(None) => stats.record_miss(elapsed),
                Err(err) => {
                    if matches!(err, CacheError::Corruption { .. }) {
                        stats.record_corruption();
                    }
                    stats.record_miss(elapsed);
                }
            }
        }

        match outcome {
            Ok(found) => {
                self.maybe_run_maintenance().await;
                found
            }
            Err(err) => {
                warn!(key, error = %err, "load failed");
                None
            }
        }
    }

    async fn try_load(&self, key: &str) -> Result<Option<LoadedArtifact>> {
        let entry = {
            let mut state = self.state.write().await;
            // Touch the hot path's access order; the catalog is the
            // authoritative copy of the metadata
            let _ = state.memory.get(key);
            match state.catalog.get(key) {
                Some(entry) if entry.is_valid() => entry.clone(),
                Some(_) => {
                    debug!(key, "purging invalid entry");
                    state.purge(key);
                    self.persist_index(&state).await?;
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };

        // Artifact reads are unbounded and run outside the state lock
        let read = self
            .backend
            .read(&entry.location, Some(&entry.checksum))
            .await;

        match read {
            Ok(Some(bytes)) => {
                let mut refreshed = entry;
                refreshed.touch();
                let (width, height) = (refreshed.width, refreshed.height);
                let mut state = self.state.write().await;
                let evicted = state.upsert(refreshed);
                drop(state);
                if evicted > 0 {
                    self.stats.write().await.record_evictions(evicted);
                }
                Ok(Some(LoadedArtifact {
                    bytes,
                    width,
                    height,
                }))
            }
            Ok(None) => {
                warn!(key, location = %entry.location, "artifact vanished, purging entry");
                self.purge_and_persist(key).await;
                Ok(None)
            }
            Err(err @ CacheError::Corruption { .. }) => {
                self.purge_and_persist(key).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // == Has Entry ==
    /// Whether a valid artifact is currently cached under `key`.
    ///
    /// A presence probe: it does not disturb the LRU order or the
    /// statistics, but it does self-heal entries whose artifact is gone.
    pub async fn has_entry(&self, key: &str) -> bool {
        let entry = {
            let mut state = self.state.write().await;
            match state.catalog.get(key) {
                Some(entry) if entry.is_valid() => entry.clone(),
                Some(_) => {
                    state.purge(key);
                    if let Err(err) = self.persist_index(&state).await {
                        warn!(key, error = %err, "index save failed after purge");
                    }
                    return false;
                }
                None => return false,
            }
        };

        if self.backend.exists(&entry.location).await {
            true
        } else {
            debug!(key, "artifact missing on disk, purging entry");
            self.purge_and_persist(key).await;
            false
        }
    }

    // == Clear ==
    /// Removes the entry and artifact for `key`.
    ///
    /// Idempotent: clearing an absent key is a successful no-op. Returns
    /// false only when the removal could not be carried out.
    pub async fn clear(&self, key: &str) -> bool {
        let started = Instant::now();
        let _key_guard = self.lock_key(key).await;
        let result = self.try_clear(key).await;
        self.stats.write().await.record_mutation(started.elapsed());

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "clear failed");
                false
            }
        }
    }

    async fn try_clear(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(removed) = state.purge(key) else {
            return Ok(());
        };
        self.gate
            .run("clear", || self.backend.remove(&removed.location))
            .await?;
        self.persist_index(&state).await
    }

    // == Clear All ==
    /// Removes every entry and artifact, leaving an empty durable tier.
    ///
    /// Also sweeps files the catalog no longer describes, so the cache
    /// root ends up holding nothing but the (empty) index.
    pub async fn clear_all(&self) {
        let mut state = self.state.write().await;
        state.clear();

        match self.backend.list().await {
            Ok(locations) => {
                for location in locations {
                    if location == INDEX_LOCATION {
                        continue;
                    }
                    let outcome = self
                        .gate
                        .run("clear_all", || self.backend.remove(&location))
                        .await;
                    if let Err(err) = outcome {
                        warn!(location = %location, error = %err, "failed to remove artifact");
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list artifacts"),
        }

        if let Err(err) = self.persist_index(&state).await {
            warn!(error = %err, "index save failed after clear_all");
        }
        info!("cache cleared");
    }

    // == Statistics ==
    /// Point-in-time statistics snapshot.
    pub async fn statistics(&self) -> CacheStatistics {
        let state = self.state.read().await;
        let stats = self.stats.read().await;
        CacheStatistics {
            entry_count: state.catalog.len(),
            total_size_bytes: state.total_size(),
            hit_rate: stats.hit_rate(),
            avg_access_time_ms: stats.avg_access_time_ms(),
        }
    }

    /// Number of entries currently held by the memory tier.
    pub async fn memory_entry_count(&self) -> usize {
        self.state.read().await.memory.count()
    }

    // == Maintenance ==
    /// Runs maintenance if the configured interval has elapsed since the
    /// last run. Safe to call on every host tick; a no-op when not due.
    pub async fn run_maintenance_if_due(&self) -> usize {
        let due = {
            let state = self.state.read().await;
            let elapsed = current_timestamp_ms().saturating_sub(state.last_cleanup_at);
            elapsed >= self.config.maintenance_interval.as_millis() as u64
        };
        if due {
            self.run_maintenance().await
        } else {
            0
        }
    }

    /// Runs maintenance now: expires entries unused for longer than the
    /// configured age, evicts oldest-first until under the total size
    /// cap, sweeps orphan files, and persists the index. Returns the
    /// number of entries removed.
    pub async fn run_maintenance(&self) -> usize {
        let mut state = self.state.write().await;
        let now = current_timestamp_ms();
        let expiry_ms = self.config.expiry_age.as_millis() as u64;
        let mut removed = 0;

        // Expire entries unused for longer than the configured age
        let expired: Vec<String> = state
            .catalog
            .values()
            .filter(|e| e.idle_ms(now) > expiry_ms)
            .map(|e| e.key.clone())
            .collect();
        for key in expired {
            self.remove_during_maintenance(&mut state, &key).await;
            removed += 1;
        }

        // Enforce the total size cap, oldest-first
        while state.total_size() > self.config.max_total_size {
            let oldest = state
                .catalog
                .values()
                .min_by_key(|e| e.last_accessed_at)
                .map(|e| e.key.clone());
            let Some(key) = oldest else { break };
            self.remove_during_maintenance(&mut state, &key).await;
            removed += 1;
        }

        // Sweep files the index does not describe (crash leftovers,
        // stranded temp files)
        let described: std::collections::HashSet<String> = state
            .catalog
            .values()
            .map(|e| e.location.clone())
            .collect();
        let mut orphans = 0;
        match self.backend.list().await {
            Ok(locations) => {
                for location in locations {
                    if location == INDEX_LOCATION || described.contains(&location) {
                        continue;
                    }
                    if let Err(err) = self.backend.remove(&location).await {
                        warn!(location = %location, error = %err, "failed to remove orphan file");
                    } else {
                        orphans += 1;
                    }
                }
            }
            Err(err) => warn!(error = %err, "orphan sweep skipped"),
        }

        state.last_cleanup_at = now;
        if let Err(err) = self.persist_index(&state).await {
            warn!(error = %err, "index save failed after maintenance");
        }

        if removed > 0 || orphans > 0 {
            info!(removed, orphans, "maintenance removed stale data");
        } else {
            debug!("maintenance found nothing to remove");
        }
        removed
    }

    async fn remove_during_maintenance(&self, state: &mut CacheState, key: &str) {
        if let Some(entry) = state.purge(key) {
            debug!(key, idle_ms = entry.idle_ms(current_timestamp_ms()), "expiring entry");
            if let Err(err) = self.backend.remove(&entry.location).await {
                // The catalog no longer lists it; the next orphan sweep
                // will retry the delete
                warn!(key, error = %err, "failed to remove expired artifact");
            }
        }
    }

    /// Forces maintenance when statistics point at a degraded or
    /// oversized cache. Advisory; correctness never depends on it.
    async fn maybe_run_maintenance(&self) {
        let oversize = {
            let state = self.state.read().await;
            state.total_size() > self.config.max_total_size
        };
        if oversize {
            debug!("size cap exceeded, forcing maintenance");
            self.run_maintenance().await;
            return;
        }
        if self.stats.read().await.is_degraded() {
            self.run_maintenance_if_due().await;
        }
    }

    // == Internal Plumbing ==
    async fn persist_index(&self, state: &CacheState) -> Result<()> {
        self.index_file
            .save(state.catalog.values().cloned().collect(), state.last_cleanup_at)
            .await
    }

    async fn purge_and_persist(&self, key: &str) {
        let mut state = self.state.write().await;
        if state.purge(key).is_some() {
            if let Err(err) = self.persist_index(&state).await {
                warn!(key, error = %err, "index save failed after purge");
            }
        }
    }

    /// Serializes save/clear pairs racing on one key, so the artifact
    /// that wins the rename is the one the catalog describes.
    async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            // Drop locks nobody is holding or waiting on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
