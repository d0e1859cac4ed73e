//! Worker pool
//!
//! `W` tokio tasks share one bounded queue of capacity `C`.
//!
//! ```text
//! submit ──try_send──▶ [ bounded queue ] ──▶ worker 0..W ──▶ JobExecutor
//!   │                                              │
//!   └──── JobTicket ◀──────── oneshot ◀────────────┘
//! ```
//!
//! Submission never blocks: a full queue is reported as `QueueFull`
//! immediately. Each job carries its own oneshot reply; a reply nobody is
//! waiting for is dropped without affecting the worker.

use chrono::Utc;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::cancel::CancelToken;
use super::job::{Job, JobExecutor, JobResult};
use super::stats::{JobCounts, TransactionStats, TransactionStatsSnapshot};
use crate::error::LedgerError;

/// Queue slots per worker when no capacity is configured.
pub const DEFAULT_QUEUE_SLOTS_PER_WORKER: usize = 10;

struct Envelope {
    id: Ulid,
    job: Job,
    reply: oneshot::Sender<JobResult>,
}

/// Handle to one submitted job.
#[derive(Debug)]
pub struct JobTicket {
    id: Ulid,
    rx: oneshot::Receiver<JobResult>,
}

impl JobTicket {
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Wait for the result or for `cancel` to fire.
    ///
    /// # Errors
    /// - `Cancelled` if the token fired first (the job may still run)
    /// - `PoolClosed` if the job was dropped during an abortive shutdown
    pub async fn wait(mut self, cancel: &CancelToken) -> Result<JobResult, LedgerError> {
        tokio::select! {
            biased;
            res = &mut self.rx => res.map_err(|_| LedgerError::PoolClosed),
            _ = cancel.cancelled() => Err(LedgerError::Cancelled),
        }
    }

    pub async fn wait_timeout(self, timeout: Duration) -> Result<JobResult, LedgerError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(res) => res.map_err(|_| LedgerError::PoolClosed),
            Err(_) => Err(LedgerError::Cancelled),
        }
    }
}

pub struct WorkerPool {
    /// `None` once shutdown has begun
    sender: RwLock<Option<mpsc::Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancelToken,
    stats: Arc<TransactionStats>,
    worker_count: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `workers` tasks over a queue of `queue_capacity` slots
    /// (0 = `workers * 10`). Must be called inside a tokio runtime.
    pub fn start(executor: Arc<dyn JobExecutor>, workers: usize, queue_capacity: usize) -> Self {
        let worker_count = workers.max(1);
        let capacity = if queue_capacity == 0 {
            worker_count * DEFAULT_QUEUE_SLOTS_PER_WORKER
        } else {
            queue_capacity
        };

        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(TransactionStats::new());
        let shutdown = CancelToken::new();

        let handles = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    rx.clone(),
                    executor.clone(),
                    stats.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers = worker_count, capacity, "Worker pool started");
        Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(handles),
            shutdown,
            stats,
            worker_count,
            capacity,
        }
    }

    /// Enqueue a job without blocking.
    ///
    /// # Errors
    /// - `Cancelled` if `cancel` already fired
    /// - `QueueFull` if every slot is taken
    /// - `PoolClosed` after shutdown
    pub fn submit(&self, job: Job, cancel: &CancelToken) -> Result<JobTicket, LedgerError> {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let guard = self.sender.read().map_err(|_| LedgerError::PoolClosed)?;
        let Some(tx) = guard.as_ref() else {
            return Err(LedgerError::PoolClosed);
        };

        let id = Ulid::new();
        let (reply, rx) = oneshot::channel();
        match tx.try_send(Envelope { id, job, reply }) {
            Ok(()) => {
                debug!(job_id = %id, "Job queued");
                Ok(JobTicket { id, rx })
            }
            Err(TrySendError::Full(envelope)) => {
                self.stats.incr_queue_full();
                warn!(kind = %envelope.job.kind(), capacity = self.capacity, "Worker queue full");
                Err(LedgerError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(LedgerError::PoolClosed),
        }
    }

    /// Submit and wait up to `timeout` for the result.
    pub async fn execute(&self, job: Job, timeout: Duration) -> Result<JobResult, LedgerError> {
        let cancel = CancelToken::new();
        self.submit(job, &cancel)?.wait_timeout(timeout).await
    }

    pub fn stats(&self) -> TransactionStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn job_counts(&self) -> JobCounts {
        self.stats.job_counts()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().map(|s| s.is_none()).unwrap_or(true)
    }

    /// Stop accepting jobs, let workers drain the queue, and wait for them.
    pub async fn shutdown(&self) {
        self.close_queue();
        self.join_workers().await;
        info!(stats = %self.stats.snapshot(), "Worker pool drained");
    }

    /// Stop accepting jobs and stop workers after their current job.
    /// Queued jobs are dropped; their tickets resolve to `PoolClosed`.
    pub async fn shutdown_now(&self) {
        self.close_queue();
        self.shutdown.cancel();
        self.join_workers().await;
        info!(stats = %self.stats.snapshot(), "Worker pool stopped");
    }

    fn close_queue(&self) {
        match self.sender.write() {
            Ok(mut sender) => {
                sender.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    async fn join_workers(&self) {
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    executor: Arc<dyn JobExecutor>,
    stats: Arc<TransactionStats>,
    shutdown: CancelToken,
) {
    debug!(worker_id, "Worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                envelope = rx.recv() => envelope,
            }
        };
        let Some(envelope) = next else {
            break;
        };

        stats.record_dequeued();
        let outcome = executor.execute(&envelope.job).await;
        stats.record_outcome(outcome.is_ok(), envelope.job.amount());

        if let Err(e) = &outcome {
            debug!(worker_id, job_id = %envelope.id, code = e.kind().code(), "Job failed");
        }

        let result = JobResult {
            job_id: envelope.id,
            job: envelope.job,
            outcome,
            processed_at: Utc::now(),
        };
        // Submitter may have given up waiting
        let _ = envelope.reply.send(result);
    }
    debug!(worker_id, "Worker exited");
}
