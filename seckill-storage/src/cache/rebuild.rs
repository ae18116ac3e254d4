//! Bounded background pool for logical-expiry rebuilds.
//!
//! A fixed number of workers pull jobs from a bounded queue. Submission
//! never waits: when the queue is full the job is handed back to the caller
//! and dropped, since a stale value has already been served. `wait_idle()`
//! lets tests and shutdown code wait until every accepted job has finished.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;

/// A unit of rebuild work.
pub type RebuildJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Why a job was not accepted. The job has already been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("rebuild queue is full")]
    QueueFull,
    #[error("rebuild pool is shut down")]
    ShutDown,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn finish_one(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct RebuildPool {
    tx: mpsc::Sender<RebuildJob>,
    rx: Arc<Mutex<mpsc::Receiver<RebuildJob>>>,
    in_flight: Arc<InFlight>,
    shutdown_tx: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    capacity: usize,
}

impl RebuildPool {
    /// Start `workers` worker tasks on the current tokio runtime.
    pub fn spawn(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<RebuildJob>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let in_flight = Arc::new(InFlight::default());

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&in_flight),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        tracing::debug!(workers, capacity, "rebuild pool started");

        Self {
            tx,
            rx,
            in_flight,
            shutdown_tx,
            workers: StdMutex::new(handles),
            worker_count: workers,
            capacity,
        }
    }

    /// Queue a job without waiting.
    pub fn try_submit(&self, job: RebuildJob) -> Result<(), SubmitError> {
        if *self.shutdown_tx.borrow() {
            return Err(SubmitError::ShutDown);
        }

        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.in_flight.finish_one();
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SubmitError::ShutDown,
                })
            }
        }
    }

    /// Accepted jobs that have not finished yet (queued or running).
    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until no accepted job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop the workers after their current job. Jobs still queued are
    /// dropped; their rebuild locks expire on their own.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "rebuild worker ended abnormally");
            }
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            self.in_flight.finish_one();
            dropped += 1;
        }
        tracing::info!(dropped, "rebuild pool shut down");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<RebuildJob>>>,
    in_flight: Arc<InFlight>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                job = rx.recv() => job,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        None
                    } else {
                        continue;
                    }
                }
            }
        };

        let Some(job) = job else {
            break;
        };

        // Run on its own task so a panicking job cannot take the worker down.
        if let Err(e) = tokio::spawn(job).await {
            tracing::error!(worker_id, error = %e, "rebuild job panicked");
        }
        in_flight.finish_one();
    }

    tracing::debug!(worker_id, "rebuild worker stopped");
}
