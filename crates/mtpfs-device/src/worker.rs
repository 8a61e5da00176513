//! Bounded task queue for background uploads and event reconciliation.
//!
//! Jobs are blocking closures. A dedicated tokio runtime pulls them off a
//! bounded channel and runs each one on its blocking pool, so at most
//! `workers` jobs run at once and at most `capacity` wait in the queue.
//! Submitting to a full queue blocks the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> u64 {
        self.submitted()
            .saturating_sub(self.completed() + self.panicked())
    }
}

pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    runtime: Option<Runtime>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("mtpfs-worker")
            .enable_time()
            .build()?;
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());

        for worker in 0..workers {
            let rx = rx.clone();
            let stats = stats.clone();
            runtime.spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else { break };
                    match tokio::task::spawn_blocking(job).await {
                        Ok(()) => {
                            stats.completed.fetch_add(1, Ordering::AcqRel);
                        }
                        Err(e) => {
                            warn!("worker {} job panicked: {}", worker, e);
                            stats.panicked.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                }
                debug!("worker {} exiting", worker);
            });
        }

        Ok(WorkerPool {
            tx: Some(tx),
            runtime: Some(runtime),
            stats,
        })
    }

    /// Queues `job`, blocking while the queue is full. Must not be called
    /// from inside an async context.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(DeviceError::QueueClosed)?;
        self.stats.submitted.fetch_add(1, Ordering::AcqRel);
        if tx.blocking_send(Box::new(job)).is_err() {
            self.stats.submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(DeviceError::QueueClosed);
        }
        Ok(())
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Waits for queued and running jobs to finish. Returns false on timeout.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.stats.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
