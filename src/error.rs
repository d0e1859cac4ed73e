//! Ledger Error Types
//!
//! Every failure the core can surface, with stable codes for callers and a
//! severity that separates business rejections from money-conservation
//! violations.

use thiserror::Error;

use crate::core_types::{Cents, TxId, UserId};
use crate::transaction::{Transaction, TxStatus};

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Business or validation rejection; the operation reached a definitive outcome.
    Rejected,
    /// The operation never ran (queue full, cancelled); caller may retry.
    Retriable,
    /// Collaborator failure; the operation was aborted.
    Fatal,
    /// Ledger is out of balance and needs operator attention.
    Critical,
}

/// Ledger error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and target account cannot be the same")]
    SameAccountTransfer,

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    // === Business Errors ===
    #[error("Insufficient funds for user {user_id}: available={available}, requested={requested}")]
    InsufficientFunds {
        user_id: UserId,
        available: Cents,
        requested: Cents,
    },

    #[error("Illegal state transition: {from} -> {to}")]
    IllegalStateTransition { from: TxStatus, to: TxStatus },

    #[error("Not found: {0}")]
    NotFound(String),

    // === Execution Errors ===
    #[error("Worker pool queue is full")]
    QueueFull,

    #[error("Operation cancelled before completion")]
    Cancelled,

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Batch size {size} exceeds maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    // === Scheduling / Events ===
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Scheduled transaction not found: {0}")]
    ScheduleNotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Event handler failed: {0}")]
    EventHandler(String),

    // === System Errors ===
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error(
        "Compensation failed for transaction {transaction_id}: {amount} cents owed to user {user_id} ({cause})"
    )]
    CompensationFailed {
        transaction_id: TxId,
        user_id: UserId,
        amount: Cents,
        cause: String,
    },
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::SameAccountTransfer => "SAME_ACCOUNT_TRANSFER",
            LedgerError::InvalidTransaction(_) => "INVALID_TRANSACTION",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::QueueFull => "QUEUE_FULL",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::PoolClosed => "POOL_CLOSED",
            LedgerError::EmptyBatch => "EMPTY_BATCH",
            LedgerError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            LedgerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            LedgerError::ScheduleNotFound(_) => "SCHEDULE_NOT_FOUND",
            LedgerError::Scheduler(_) => "SCHEDULER_ERROR",
            LedgerError::EventHandler(_) => "EVENT_HANDLER_FAILED",
            LedgerError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            LedgerError::CompensationFailed { .. } => "COMPENSATION_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LedgerError::QueueFull | LedgerError::Cancelled => Severity::Retriable,
            LedgerError::StorageUnavailable(_)
            | LedgerError::PoolClosed
            | LedgerError::Scheduler(_)
            | LedgerError::EventHandler(_) => Severity::Fatal,
            LedgerError::CompensationFailed { .. } => Severity::Critical,
            _ => Severity::Rejected,
        }
    }

    /// Whether the caller may resubmit. The core itself never retries.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.severity() == Severity::Retriable
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::StorageUnavailable(e.to_string())
    }
}

/// Failure of an orchestrated operation.
///
/// Carries the transaction record as stored, so callers can tell "it failed"
/// (record present, status failed) from "it never started" (validation
/// rejected before any write). With `StorageUnavailable` the record may still
/// be `pending`: the final status write did not land.
#[derive(Error, Debug, Clone)]
#[error("{source}")]
pub struct ApplyError {
    pub transaction: Option<Box<Transaction>>,
    #[source]
    pub source: LedgerError,
}

impl ApplyError {
    pub fn rejected(source: LedgerError) -> Self {
        Self {
            transaction: None,
            source,
        }
    }

    pub fn with_record(transaction: Transaction, source: LedgerError) -> Self {
        Self {
            transaction: Some(Box::new(transaction)),
            source,
        }
    }

    pub fn kind(&self) -> &LedgerError {
        &self.source
    }

    pub fn into_inner(self) -> LedgerError {
        self.source
    }
}

impl From<LedgerError> for ApplyError {
    fn from(e: LedgerError) -> Self {
        Self::rejected(e)
    }
}
