use super::admission::{AdmissionPool, AdmissionStats};
use crate::core::Result;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::warn;

/// Bounded executor: every worker is spawned here, and only after it holds
/// an admission slot.
///
/// The slot moves into the worker and is dropped when the worker finishes,
/// panics or is aborted, so the admission pool is the one concurrency limit.
#[derive(Clone)]
pub struct WorkerPool {
    admission: AdmissionPool,
    workers: Arc<Mutex<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(admission: AdmissionPool) -> Self {
        Self {
            admission,
            workers: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn admission(&self) -> &AdmissionPool {
        &self.admission
    }

    pub fn stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    /// Wait for a slot, then run `task` as an independent worker.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.admission.acquire().await?;

        let mut workers = self.lock_workers();
        reap_finished(&mut workers, self.admission.name());
        workers.spawn(async move {
            let _slot = slot;
            task.await;
        });
        Ok(())
    }

    /// Workers spawned and not yet reaped.
    pub fn tracked_workers(&self) -> usize {
        self.lock_workers().len()
    }

    /// Wait for every worker spawned so far, including ones submitted while
    /// draining.
    pub async fn drain(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.lock_workers());
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(err) = joined {
                    log_join_error(self.admission.name(), &err);
                }
            }
        }
    }

    /// Stop admitting new work. Pending `submit` calls fail with
    /// `PoolClosed`.
    pub fn close(&self) {
        self.admission.close();
    }

    fn lock_workers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn reap_finished(workers: &mut JoinSet<()>, pool: &str) {
    while let Some(joined) = workers.try_join_next() {
        if let Err(err) = joined {
            log_join_error(pool, &err);
        }
    }
}

fn log_join_error(pool: &str, err: &tokio::task::JoinError) {
    if err.is_panic() {
        warn!(pool, error = %err, "worker panicked");
    }
}
