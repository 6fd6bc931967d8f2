//! Generic bounded worker pool with a two-phase completion barrier.
//!
//! A pool owns a bounded task queue and a fixed number of worker tasks that
//! pull from it. Submitters wait while the queue is full, which is what keeps
//! a burst of submissions from turning into unbounded concurrent work.
//!
//! Shutdown happens in two phases: every [`PoolSender`] and the pool's own
//! sender are dropped (input closed), then [`WorkerPool::finish`] waits until
//! the workers have drained the queue and finished their in-flight task.
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use engine_logging::{engine_debug, engine_error};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl PoolSettings {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker pool is closed")]
pub struct PoolClosed;

/// Cloneable submission handle. The pool's input stays open while any handle
/// is alive.
#[derive(Debug)]
pub struct PoolSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for PoolSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> PoolSender<T> {
    /// Queues `item`, waiting for space when the queue is full.
    pub async fn submit(&self, item: T) -> Result<(), PoolClosed> {
        self.tx.send(item).await.map_err(|_| PoolClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    pub processed: usize,
    pub panicked_workers: usize,
}

pub struct WorkerPool<T> {
    name: &'static str,
    sender: PoolSender<T>,
    workers: Vec<JoinHandle<()>>,
    processed: Arc<AtomicUsize>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Starts `settings.workers` workers (at least one) running `handler` on
    /// each queued item. Must be called from within a Tokio runtime.
    pub fn spawn<H, Fut>(name: &'static str, settings: PoolSettings, handler: H) -> Self
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let worker_count = settings.workers.max(1);
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);
        let processed = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let rx = rx.clone();
                let handler = handler.clone();
                let processed = processed.clone();
                tokio::spawn(async move {
                    loop {
                        // Only the idle worker holding the lock waits on the
                        // queue; the rest wait for the lock.
                        let next = rx.lock().await.recv().await;
                        let Some(item) = next else { break };
                        handler(item).await;
                        processed.fetch_add(1, Ordering::Relaxed);
                    }
                    engine_debug!("{name} worker {worker_id} drained");
                })
            })
            .collect();

        engine_debug!(
            "{name} pool started: workers={} queue_capacity={}",
            worker_count,
            settings.queue_capacity.max(1)
        );

        Self {
            name,
            sender: PoolSender { tx },
            workers,
            processed,
        }
    }

    pub fn sender(&self) -> PoolSender<T> {
        self.sender.clone()
    }

    pub async fn submit(&self, item: T) -> Result<(), PoolClosed> {
        self.sender.submit(item).await
    }

    /// Closes the pool's own input and waits for every worker to exit.
    ///
    /// Workers only exit once the queue is empty and every outstanding
    /// [`PoolSender`] has been dropped, so callers must release their handles
    /// first or this never resolves.
    pub async fn finish(self) -> PoolReport {
        let WorkerPool {
            name,
            sender,
            workers,
            processed,
        } = self;
        drop(sender);

        let mut panicked_workers = 0;
        for worker in workers {
            if let Err(err) = worker.await {
                panicked_workers += 1;
                engine_error!("{name} worker failed: {err}");
            }
        }

        let report = PoolReport {
            processed: processed.load(Ordering::Relaxed),
            panicked_workers,
        };
        engine_debug!(
            "{name} pool finished: processed={} panicked_workers={}",
            report.processed,
            report.panicked_workers
        );
        report
    }
}
