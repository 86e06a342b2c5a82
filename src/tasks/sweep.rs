//! Expiry Sweep Task
//!
//! Background task that periodically removes expired in-process entries.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::memory::MemoryInner;

/// Spawns a task that sweeps expired entries every `interval`.
///
/// The task only holds a weak reference, so it ends on its own once the
/// cache is dropped or closed. The returned handle lets the owner abort it
/// earlier.
pub(crate) fn spawn_sweep_task(cache: Weak<MemoryInner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Starting expiry sweep with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = cache.upgrade() else {
                break;
            };
            if cache.is_closed() {
                break;
            }

            let removed = cache.sweep_expired().await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }

        debug!("Expiry sweep stopped");
    })
}
