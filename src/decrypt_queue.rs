//! FIFO decrypt job queue with a fixed concurrency budget.
//!
//! A single driver task drains the queue in batches of at most
//! `max_concurrent` jobs, waiting for each batch to settle before starting
//! the next. Enqueueing while the driver runs only grows the queue; it
//! never starts a second driver. A job that errors or panics is logged and
//! dropped; its batch siblings and later jobs still run.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Default number of jobs allowed to run at the same time.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// A unit of decrypt work. Failures are terminal for the job; the queue never
/// retries. Callers that need the outcome capture it inside the closure.
pub type DecryptJob = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<DecryptJob>,
    /// Lives under the same lock as `pending` so a job pushed while the driver
    /// is deciding to stop is always picked up.
    running: bool,
}

pub struct DecryptQueue {
    state: Mutex<QueueState>,
    idle: Notify,
    max_concurrent: usize,
}

impl std::fmt::Debug for DecryptQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptQueue")
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl Default for DecryptQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl DecryptQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            idle: Notify::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue a job and start the driver if it is not running.
    pub async fn enqueue(self: &Arc<Self>, job: DecryptJob) {
        let start_driver = {
            let mut state = self.lock_state();
            state.pending.push_back(job);
            !std::mem::replace(&mut state.running, true)
        };

        if start_driver {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drive().await });
        }
    }

    /// Convenience wrapper around [`DecryptQueue::enqueue`] for async closures.
    pub async fn enqueue_fn<F, Fut>(self: &Arc<Self>, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.enqueue(Box::new(move || Box::pin(f()))).await;
    }

    /// Number of jobs waiting to start
    pub async fn pending(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub async fn is_idle(&self) -> bool {
        let state = self.lock_state();
        !state.running && state.pending.is_empty()
    }

    /// Wait until the driver has drained the queue and stopped.
    pub async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle().await {
                return;
            }
            notified.await;
        }
    }

    async fn drive(self: Arc<Self>) {
        // If the driver itself unwinds, the next enqueue must start a new one.
        let queue = Arc::clone(&self);
        let _stopped = scopeguard::guard_on_unwind((), move |_| {
            queue.lock_state().running = false;
            queue.idle.notify_waiters();
        });

        let mut batches = 0usize;
        loop {
            let batch: Vec<DecryptJob> = {
                let mut state = self.lock_state();
                if state.pending.is_empty() {
                    state.running = false;
                    break;
                }
                let n = self.max_concurrent.min(state.pending.len());
                state.pending.drain(..n).collect()
            };

            batches += 1;
            let size = batch.len();
            let results = join_all(
                batch
                    .into_iter()
                    .map(|job| AssertUnwindSafe(async move { job().await }).catch_unwind()),
            )
            .await;

            let mut failed = 0usize;
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        failed += 1;
                        warn!("Decrypt job failed: {:#}", err);
                    }
                    Err(_) => {
                        failed += 1;
                        error!("Decrypt job panicked");
                    }
                }
            }
            debug!("Decrypt batch settled: {} jobs, {} failed", size, failed);
        }
        debug!("Decrypt queue drained after {} batches", batches);
        self.idle.notify_waiters();
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
