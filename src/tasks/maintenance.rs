//! Maintenance Task
//!
//! Periodic tick that lets the cache expire stale entries and enforce
//! its size cap. The host owns the returned handle and aborts it during
//! shutdown; nothing here outlives its owner.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ArtifactCache;

/// Spawns a task that ticks the cache's maintenance at a fixed interval.
///
/// Each tick calls [`ArtifactCache::run_maintenance_if_due`], which is a
/// no-op unless the configured maintenance interval has elapsed — the
/// tick can therefore be much shorter than the interval without causing
/// extra work.
///
/// # Arguments
/// * `cache` - Shared cache instance
/// * `tick_interval` - How often to check whether maintenance is due
///
/// # Returns
/// A JoinHandle the host should keep and abort on shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(ArtifactCache::open(config).await?);
/// let maintenance = spawn_maintenance_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// maintenance.abort();
/// ```
pub fn spawn_maintenance_task(
    cache: Arc<ArtifactCache>,
    tick_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            tick_secs = tick_interval.as_secs(),
            "maintenance task started"
        );

        loop {
            tokio::time::sleep(tick_interval).await;

            let removed = cache.run_maintenance_if_due().await;
            if removed > 0 {
                info!(removed, "maintenance tick removed stale entries");
            } else {
                debug!("maintenance tick: nothing due");
            }
        }
    })
}
