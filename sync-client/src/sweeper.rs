//! Background sweep of expired cache entries.
//!
//! Reads evict expired entries lazily; the sweep keeps entries nobody reads
//! again from piling up.

use std::sync::Arc;
use std::time::Duration;
use tasksync_cache::Cache;
use tokio::time::interval;

/// Spawn a background sweep task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cache_sweeper(cache: Arc<dyn Cache>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Cache sweeper started (interval: {}s)", period.as_secs());

        let mut timer = interval(period);

        loop {
            timer.tick().await;

            let removed = cache.clear_expired();
            if removed > 0 {
                tracing::info!("Cache sweep: removed {} expired entries", removed);
            } else {
                tracing::debug!("Cache sweep: no expired entries");
            }
        }
    })
}
