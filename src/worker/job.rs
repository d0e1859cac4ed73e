//! Jobs and their results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::core_types::{Cents, UserId};
use crate::error::ApplyError;
use crate::orchestrator::TransferOrchestrator;
use crate::transaction::{Transaction, TxKind};

/// In-memory unit of work. Never persisted: a job queued or in flight when
/// the process exits is lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Job {
    Credit {
        user_id: UserId,
        amount: Cents,
    },
    Debit {
        user_id: UserId,
        amount: Cents,
    },
    Transfer {
        from: UserId,
        to: UserId,
        amount: Cents,
    },
}

impl Job {
    pub fn kind(&self) -> TxKind {
        match self {
            Job::Credit { .. } => TxKind::Credit,
            Job::Debit { .. } => TxKind::Debit,
            Job::Transfer { .. } => TxKind::Transfer,
        }
    }

    pub fn amount(&self) -> Cents {
        match self {
            Job::Credit { amount, .. } | Job::Debit { amount, .. } | Job::Transfer { amount, .. } => {
                *amount
            }
        }
    }
}

/// Outcome delivered to the submitter.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: Ulid,
    pub job: Job,
    /// Terminal record on success; `ApplyError` (with the failed record when
    /// one was written) otherwise.
    pub outcome: Result<Transaction, ApplyError>,
    pub processed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.outcome {
            Ok(tx) => Some(tx),
            Err(e) => e.transaction.as_deref(),
        }
    }
}

/// Executes one job. The pool's only dependency on the ledger.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<Transaction, ApplyError>;
}

#[async_trait]
impl JobExecutor for TransferOrchestrator {
    async fn execute(&self, job: &Job) -> Result<Transaction, ApplyError> {
        match *job {
            Job::Credit { user_id, amount } => self.apply_credit(user_id, amount).await,
            Job::Debit { user_id, amount } => self.apply_debit(user_id, amount).await,
            Job::Transfer { from, to, amount } => self.apply_transfer(from, to, amount).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_and_amount() {
        let job = Job::Transfer {
            from: 1,
            to: 2,
            amount: 300,
        };
        assert_eq!(job.kind(), TxKind::Transfer);
        assert_eq!(job.amount(), 300);
        assert_eq!(
            Job::Debit {
                user_id: 1,
                amount: 5
            }
            .kind(),
            TxKind::Debit
        );
    }

    #[test]
    fn test_job_json_shape() {
        let job = Job::Credit {
            user_id: 9,
            amount: 100,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "credit");
        assert_eq!(value["user_id"], 9);
    }
}
