//! Batch processing on top of the worker pool.
//!
//! A batch is a named group of jobs submitted together and tracked as
//! `pending → processing → completed | failed`. A batch is `failed` only
//! when every job failed; a mix of outcomes is `completed` with a note
//! counting the failures.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::cancel::CancelToken;
use super::job::{Job, JobResult};
use super::pool::WorkerPool;
use super::stats::{TransactionStats, TransactionStatsSnapshot};
use crate::error::LedgerError;

/// Lifecycle of a batch.
///
/// `Completed` and `Failed` count job outcomes as seen by the batch. A job
/// whose wait hit the batch timeout counts as failed even though the pool
/// may still run it, so a `Failed` batch can have moved funds. The ledger
/// records are authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub status: BatchStatus,
    pub job_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Diagnostic, set when at least one job failed
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Handle to a running batch.
pub struct BatchTicket {
    pub id: String,
    handle: JoinHandle<Batch>,
}

impl BatchTicket {
    /// Wait for the batch to reach a terminal status.
    pub async fn wait(self) -> Result<Batch, LedgerError> {
        self.handle.await.map_err(|e| {
            warn!(batch_id = %self.id, error = %e, "Batch task aborted");
            LedgerError::PoolClosed
        })
    }
}

/// Tracked batches beyond which finished ones are pruned on the next start.
pub const MAX_RETAINED_BATCHES: usize = 1_000;

pub struct BatchProcessor {
    pool: Arc<WorkerPool>,
    max_batch_size: usize,
    batch_timeout: Duration,
    batches: Arc<DashMap<String, Batch>>,
    stats: Arc<TransactionStats>,
}

impl BatchProcessor {
    pub fn new(pool: Arc<WorkerPool>, max_batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            pool,
            max_batch_size,
            batch_timeout,
            batches: Arc::new(DashMap::new()),
            stats: Arc::new(TransactionStats::new()),
        }
    }

    /// Validate and start a batch in the background.
    ///
    /// # Errors
    /// - `EmptyBatch` if `jobs` is empty
    /// - `BatchTooLarge` if `jobs.len() > max_batch_size`
    pub fn start_batch(
        &self,
        name: impl Into<String>,
        jobs: Vec<Job>,
    ) -> Result<BatchTicket, LedgerError> {
        if jobs.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        if jobs.len() > self.max_batch_size {
            return Err(LedgerError::BatchTooLarge {
                size: jobs.len(),
                max: self.max_batch_size,
            });
        }

        if self.batches.len() >= MAX_RETAINED_BATCHES {
            let pruned = self.prune_finished();
            debug!(pruned, "Pruned finished batches");
        }

        let id = Ulid::new().to_string();
        let batch = Batch {
            id: id.clone(),
            name: name.into(),
            status: BatchStatus::Pending,
            job_count: jobs.len(),
            succeeded: 0,
            failed: 0,
            note: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.batches.insert(id.clone(), batch);

        let handle = tokio::spawn(run_batch(
            id.clone(),
            jobs,
            self.pool.clone(),
            self.batches.clone(),
            self.stats.clone(),
            self.batch_timeout,
        ));
        Ok(BatchTicket { id, handle })
    }

    pub fn status(&self, id: &str) -> Option<Batch> {
        self.batches.get(id).map(|b| b.value().clone())
    }

    /// Drop every batch in a terminal status. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, batch| !batch.status.is_terminal());
        before.saturating_sub(self.batches.len())
    }

    pub fn tracked(&self) -> usize {
        self.batches.len()
    }

    /// Per-job counters across every batch run by this processor.
    pub fn stats(&self) -> TransactionStatsSnapshot {
        self.stats.snapshot()
    }
}

async fn run_batch(
    id: String,
    jobs: Vec<Job>,
    pool: Arc<WorkerPool>,
    batches: Arc<DashMap<String, Batch>>,
    stats: Arc<TransactionStats>,
    timeout: Duration,
) -> Batch {
    if let Some(mut batch) = batches.get_mut(&id) {
        batch.status = BatchStatus::Processing;
    }

    let cancel = CancelToken::new();
    let timer = cancel.cancel_after(timeout);
    let outcomes: Vec<(i64, Result<JobResult, LedgerError>)> =
        join_all(jobs.into_iter().map(|job| {
            let pool = pool.clone();
            let cancel = cancel.clone();
            async move {
                let amount = job.amount();
                let result = match pool.submit(job, &cancel) {
                    Ok(ticket) => ticket.wait(&cancel).await,
                    Err(e) => Err(e),
                };
                (amount, result)
            }
        }))
        .await;
    timer.abort();

    let mut succeeded = 0;
    let mut failed = 0;
    for (amount, outcome) in &outcomes {
        stats.record_dequeued();
        match outcome {
            Ok(result) if result.is_success() => {
                succeeded += 1;
                stats.record_outcome(true, *amount);
            }
            Ok(_) => {
                failed += 1;
                stats.record_outcome(false, *amount);
            }
            Err(e) => {
                failed += 1;
                stats.record_outcome(false, *amount);
                warn!(batch_id = %id, error = %e, "Batch job not executed");
            }
        }
    }

    let (status, note) = if failed == 0 {
        (BatchStatus::Completed, None)
    } else if succeeded == 0 {
        (BatchStatus::Failed, Some("All jobs failed".to_string()))
    } else {
        (BatchStatus::Completed, Some(format!("{} jobs failed", failed)))
    };

    let finished = match batches.get_mut(&id) {
        Some(mut batch) => {
            batch.status = status;
            batch.succeeded = succeeded;
            batch.failed = failed;
            batch.note = note;
            batch.completed_at = Some(Utc::now());
            batch.value().clone()
        }
        None => Batch {
            id: id.clone(),
            name: String::new(),
            status,
            job_count: outcomes.len(),
            succeeded,
            failed,
            note,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        },
    };

    info!(
        batch_id = %id,
        status = %finished.status,
        succeeded,
        failed,
        "Batch finished"
    );
    finished
}
