//! Bounded worker pool for independent artifact builds.
//!
//! Jobs are blocking closures (every stage reads and writes whole files), so
//! each runs on the blocking thread pool while a semaphore caps how many
//! are in flight. Results come back in submission order.

use crate::bundler::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Worker count when none is configured.
pub fn default_workers() -> usize {
    num_cpus::get().max(1)
}

/// Runs `jobs` with at most `workers` running at once.
///
/// A failing job does not cancel the others; each result is reported at
/// the index of its job.
pub async fn run_blocking<T, F>(jobs: Vec<F>, workers: usize) -> Vec<Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (index, job) in jobs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => match tokio::task::spawn_blocking(job).await {
                    Ok(result) => result,
                    Err(e) => Err(Error::Join(e)),
                },
                Err(e) => Err(Error::GenericError(format!("worker pool closed: {e}"))),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => log::error!("worker task failed to join: {}", e),
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::GenericError("worker task was lost".into()))))
        .collect()
}
