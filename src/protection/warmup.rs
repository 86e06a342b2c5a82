//! Warm-Up Loader
//!
//! Bulk-fills the cache: one pipelined existence check, then the missing
//! keys go through a bounded pool of loader tasks and the results are
//! written back in one batch. Individual failures are reported, not fatal.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::ProtectedCache;
use crate::cache::{validate_key, validate_value, CoordinationStore};
use crate::codec::Codec;
use crate::error::Result;

// == Warm-Up Report ==
/// Per-key outcome of a warm-up call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmUpReport {
    /// Keys already cached; loader not called
    pub skipped: Vec<String>,
    /// Keys loaded and written
    pub loaded: Vec<String>,
    /// Keys whose load or encoding failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl WarmUpReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<S: CoordinationStore + ?Sized, C: Codec> ProtectedCache<S, C> {
    // == Warm Up ==
    /// Loads every key in `keys` that is not cached yet, running at most
    /// `warm_up_workers` loaders at once, and stores the results with the
    /// instance default TTL.
    ///
    /// Only backend failures of the existence check or the final batch
    /// write fail the call. Invalid keys, loader errors, loader panics and
    /// oversized values end up in [`WarmUpReport::failed`].
    pub async fn warm_up<T, F, Fut>(&self, keys: &[String], loader: F) -> Result<WarmUpReport>
    where
        T: Serialize + Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut report = WarmUpReport::default();
        let mut seen = HashSet::new();
        let candidates: Vec<String> = keys
            .iter()
            .filter(|key| seen.insert(*key))
            .cloned()
            .filter_map(|key| match validate_key(&key) {
                Ok(()) => Some(key),
                Err(err) => {
                    warn!("Warm-up skipped invalid key {:?}: {}", key, err);
                    report.failed.push((key, err.to_string()));
                    None
                }
            })
            .collect();
        if candidates.is_empty() {
            return Ok(report);
        }

        let present = self.store.exists_multi(&candidates).await?;
        let mut missing = Vec::new();
        for (key, exists) in candidates.into_iter().zip(present) {
            if exists {
                report.skipped.push(key);
            } else {
                missing.push(key);
            }
        }
        if missing.is_empty() {
            debug!("Warm-up: all {} keys already cached", report.skipped.len());
            return Ok(report);
        }

        let mut pending: HashSet<String> = missing.iter().cloned().collect();
        let outcomes = run_loaders(missing, loader, self.options.warm_up_workers).await;

        let mut items = HashMap::with_capacity(outcomes.len());
        for (key, outcome) in outcomes {
            pending.remove(&key);
            let encoded = outcome.and_then(|value| {
                let bytes = self.codec.encode(&value)?;
                validate_value(&bytes)?;
                Ok(bytes)
            });
            match encoded {
                Ok(bytes) => {
                    items.insert(key.clone(), bytes);
                    report.loaded.push(key);
                }
                Err(err) => {
                    warn!("Warm-up load for {} failed: {:#}", key, err);
                    report.failed.push((key, format!("{:#}", err)));
                }
            }
        }
        for key in pending {
            warn!("Warm-up load for {} never reported back", key);
            report.failed.push((key, "loader did not complete".to_string()));
        }

        self.store.set_multi(items, Duration::ZERO).await?;

        info!(
            "Warm-up finished: {} loaded, {} skipped, {} failed",
            report.loaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

// == Worker Pool ==
/// Fans `jobs` out to `min(cap, jobs)` tasks and waits for all of them.
async fn run_loaders<T, F, Fut>(
    jobs: Vec<String>,
    loader: F,
    cap: usize,
) -> Vec<(String, anyhow::Result<T>)>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    if jobs.is_empty() {
        return Vec::new();
    }
    let workers = cap.max(1).min(jobs.len());

    // Sized to the job count, so dispatch never waits on a worker.
    let (job_tx, job_rx) = mpsc::channel(jobs.len());
    for key in jobs {
        if let Err(err) = job_tx.try_send(key) {
            warn!("Warm-up job could not be queued: {}", err);
        }
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let loader = Arc::new(loader);

    let mut pool = JoinSet::new();
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let loader = loader.clone();
        pool.spawn(async move {
            loop {
                let next = job_rx.lock().await.recv().await;
                let Some(key) = next else {
                    break;
                };
                // A panicking loader fails its own key, not the worker
                let outcome = match tokio::spawn(loader(key.clone())).await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(anyhow::anyhow!("loader task failed: {}", err)),
                };
                if result_tx.send((key, outcome)).is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let mut outcomes = Vec::new();
    while let Some(outcome) = result_rx.recv().await {
        outcomes.push(outcome);
    }
    while let Some(joined) = pool.join_next().await {
        if let Err(err) = joined {
            warn!("Warm-up worker stopped abnormally: {}", err);
        }
    }
    outcomes
}
