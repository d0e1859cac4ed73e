//! Transaction Ledger
//!
//! Typed transaction records and their state machine.
//!
//! # State Machine
//!
//! ```text
//! PENDING ──▶ COMPLETED
//!    │
//!    └──────▶ FAILED
//! ```
//!
//! COMPLETED and FAILED are terminal and absorbing: any further transition is
//! rejected with `IllegalStateTransition`, both on the in-memory record and by
//! the store when persisting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::core_types::{Cents, TxId, UserId};
use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Credit,
    Debit,
    Transfer,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Credit => "credit",
            TxKind::Debit => "debit",
            TxKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TxKind::Credit),
            "debit" => Ok(TxKind::Debit),
            "transfer" => Ok(TxKind::Transfer),
            other => Err(LedgerError::InvalidTransaction(format!(
                "unknown transaction type: {}",
                other
            ))),
        }
    }
}

/// Transaction FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Initial state - record written, balances not yet touched
    Pending,
    /// Terminal: balance mutation applied
    Completed,
    /// Terminal: mutation rejected or rolled back, see failure_cause
    Failed,
}

impl TxStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed)
    }

    #[inline]
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Completed) | (TxStatus::Pending, TxStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(LedgerError::InvalidTransaction(format!(
                "unknown transaction status: {}",
                other
            ))),
        }
    }
}

/// Validated request to open a transaction. Construct through the
/// `credit`/`debit`/`transfer` helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TxKind,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount_cents: Cents,
}

impl NewTransaction {
    pub fn credit(user_id: UserId, amount_cents: Cents) -> Self {
        Self {
            kind: TxKind::Credit,
            from_user_id: None,
            to_user_id: Some(user_id),
            amount_cents,
        }
    }

    pub fn debit(user_id: UserId, amount_cents: Cents) -> Self {
        Self {
            kind: TxKind::Debit,
            from_user_id: Some(user_id),
            to_user_id: None,
            amount_cents,
        }
    }

    pub fn transfer(from: UserId, to: UserId, amount_cents: Cents) -> Self {
        Self {
            kind: TxKind::Transfer,
            from_user_id: Some(from),
            to_user_id: Some(to),
            amount_cents,
        }
    }

    /// Structural validation, run before anything is written.
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_shape(
            self.kind,
            self.from_user_id,
            self.to_user_id,
            self.amount_cents,
        )
    }
}

fn validate_shape(
    kind: TxKind,
    from: Option<UserId>,
    to: Option<UserId>,
    amount_cents: Cents,
) -> Result<(), LedgerError> {
    if amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount);
    }

    match (kind, from, to) {
        (TxKind::Transfer, Some(f), Some(t)) if f == t => Err(LedgerError::SameAccountTransfer),
        (TxKind::Transfer, Some(_), Some(_)) => Ok(()),
        (TxKind::Transfer, _, _) => Err(LedgerError::InvalidTransaction(
            "transfer requires both from and to user IDs".into(),
        )),
        (TxKind::Credit, None, Some(_)) => Ok(()),
        (TxKind::Credit, _, _) => Err(LedgerError::InvalidTransaction(
            "credit must set only to_user_id".into(),
        )),
        (TxKind::Debit, Some(_), None) => Ok(()),
        (TxKind::Debit, _, _) => Err(LedgerError::InvalidTransaction(
            "debit must set only from_user_id".into(),
        )),
    }
}

/// Persisted transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount_cents: Cents,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub status: TxStatus,
    pub failure_cause: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a pending record from a validated request. The id is filled in
    /// by the store.
    pub fn pending(new: &NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            from_user_id: new.from_user_id,
            to_user_id: new.to_user_id,
            amount_cents: new.amount_cents,
            kind: new.kind,
            status: TxStatus::Pending,
            failure_cause: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_shape(
            self.kind,
            self.from_user_id,
            self.to_user_id,
            self.amount_cents,
        )
    }

    pub fn transition_to(&mut self, next: TxStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::IllegalStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), LedgerError> {
        self.transition_to(TxStatus::Completed)
    }

    pub fn mark_failed(&mut self, cause: impl Into<String>) -> Result<(), LedgerError> {
        self.transition_to(TxStatus::Failed)?;
        self.failure_cause = Some(cause.into());
        Ok(())
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn amount_major(&self) -> Decimal {
        crate::money::cents_to_major(self.amount_cents)
    }
}

/// Transaction ledger: validated writes and terminal finalization on top of
/// the persistence collaborator.
#[derive(Clone)]
pub struct TransactionLedger {
    store: Arc<dyn LedgerStore>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a new pending transaction.
    ///
    /// Validation precedes the write: an invalid request is never stored.
    pub async fn open(&self, new: &NewTransaction) -> Result<Transaction, LedgerError> {
        new.validate()?;
        let tx = self.store.insert_transaction(Transaction::pending(new)).await?;
        debug!(tx_id = tx.id, kind = %tx.kind, amount = tx.amount_cents, "Transaction opened");
        Ok(tx)
    }

    /// Move a pending transaction to COMPLETED and persist it.
    ///
    /// `tx` is only updated once the store accepted the write; on error it
    /// still mirrors the stored row.
    pub async fn complete(&self, tx: &mut Transaction) -> Result<(), LedgerError> {
        let mut next = tx.clone();
        next.mark_completed()?;
        self.store.update_transaction(&next).await?;
        *tx = next;
        Ok(())
    }

    /// Move a pending transaction to FAILED with a cause and persist it.
    /// Same write-then-commit rule as [`TransactionLedger::complete`].
    pub async fn fail(&self, tx: &mut Transaction, cause: &str) -> Result<(), LedgerError> {
        let mut next = tx.clone();
        next.mark_failed(cause)?;
        self.store.update_transaction(&next).await?;
        *tx = next;
        Ok(())
    }

    pub async fn get(&self, id: TxId) -> Result<Transaction, LedgerError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))
    }

    /// Most recent transactions, newest first.
    pub async fn latest(&self, limit: usize) -> Result<Vec<Transaction>, LedgerError> {
        self.store.latest_transactions(limit).await
    }
}
