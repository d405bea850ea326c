// src/core/pool.rs

//! A fixed-size pool of workers pulling from one shared, cancellable queue.
//!
//! The queue wraps a lazy iterator, so the backlog is never materialised:
//! at most `workers` items are ever taken out of it and in flight at once.
//! Each unit runs as its own task; a panicking unit is logged and counted
//! without taking its worker down.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// How the units handed to a pool ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Units taken from the queue.
    pub started: usize,
    /// Units whose handler ran to completion.
    pub completed: usize,
    /// Units in flight when cancellation fired.
    pub cancelled: usize,
    /// Units whose handler panicked.
    pub panicked: usize,
}

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
    panicked: AtomicUsize,
}

impl Counters {
    fn report(&self) -> PoolReport {
        PoolReport {
            started: self.started.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
        }
    }
}

/// The shared work source. Yields nothing once cancellation has fired.
struct WorkQueue<I> {
    source: Mutex<I>,
    cancel: CancellationToken,
}

impl<I: Iterator> WorkQueue<I> {
    fn next(&self) -> Option<I::Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return None;
        }
        source.next()
    }
}

/// Runs work units with at most `workers` of them active at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: NonZeroUsize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: NonZeroUsize, cancel: CancellationToken) -> Self {
        Self { workers, cancel }
    }

    /// Drains `source` through `handler` and returns once every worker has
    /// stopped: either the source is exhausted and all units finished, or
    /// cancellation fired and every in-flight unit was aborted and reaped.
    ///
    /// The handler receives the pool's token so it can stop cooperatively
    /// between steps.
    pub async fn run<I, F, Fut>(&self, source: I, handler: F) -> PoolReport
    where
        I: Iterator + Send + 'static,
        I::Item: Send + 'static,
        F: Fn(I::Item, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue = Arc::new(WorkQueue {
            source: Mutex::new(source),
            cancel: self.cancel.clone(),
        });
        let handler = Arc::new(handler);
        let counters = Arc::new(Counters::default());

        let mut workers = JoinSet::new();
        for worker in 0..self.workers.get() {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let counters = Arc::clone(&counters);
            let cancel = self.cancel.clone();

            workers.spawn(async move {
                while let Some(item) = queue.next() {
                    counters.started.fetch_add(1, Ordering::SeqCst);
                    let mut unit = tokio::spawn((*handler)(item, cancel.clone()));

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            unit.abort();
                            // Wait for the abort so sockets and locks are released.
                            let _ = (&mut unit).await;
                            counters.cancelled.fetch_add(1, Ordering::SeqCst);
                            break;
                        }
                        joined = &mut unit => match joined {
                            Ok(()) => {
                                counters.completed.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => {
                                error!(worker, error = %e, "Work unit panicked.");
                                counters.panicked.fetch_add(1, Ordering::SeqCst);
                            }
                        },
                    }
                }
                trace!(worker, "Worker finished.");
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed.");
            }
        }

        let report = counters.report();
        debug!(?report, "Worker pool drained.");
        report
    }
}
