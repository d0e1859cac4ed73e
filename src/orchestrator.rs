//! Transfer Orchestrator
//!
//! Drives credit, debit and transfer through "create, mutate, finalize":
//!
//! ```text
//! open(pending) ──▶ BalanceStore mutation ──▶ complete ──▶ audit
//!                          │
//!                          └─ error ──▶ fail(cause)
//! ```
//!
//! A transfer is two single-account steps. If the destination credit fails
//! after the source debit succeeded, a compensating credit returns the funds
//! to the source. If that compensation also fails the ledger is out of
//! balance and `CompensationFailed` is surfaced with critical severity.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::audit::{AuditSink, record_best_effort};
use crate::balance_store::BalanceStore;
use crate::core_types::{Cents, UserId};
use crate::error::{ApplyError, LedgerError, Severity};
use crate::transaction::{NewTransaction, Transaction, TransactionLedger};

pub struct TransferOrchestrator {
    balances: Arc<BalanceStore>,
    ledger: TransactionLedger,
    audit: Arc<dyn AuditSink>,
}

impl TransferOrchestrator {
    pub fn new(
        balances: Arc<BalanceStore>,
        ledger: TransactionLedger,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            balances,
            ledger,
            audit,
        }
    }

    pub fn balances(&self) -> &Arc<BalanceStore> {
        &self.balances
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    /// Credit `amount` to `user_id`.
    ///
    /// Returns the completed record, or an `ApplyError` carrying the failed
    /// record (or none when validation rejected the request before any write).
    pub async fn apply_credit(
        &self,
        user_id: UserId,
        amount: Cents,
    ) -> Result<Transaction, ApplyError> {
        let tx = self
            .ledger
            .open(&NewTransaction::credit(user_id, amount))
            .await?;

        match self.balances.credit(user_id, amount).await {
            Ok(_) => self.complete(tx).await,
            Err(e) => Err(self.fail(tx, e).await),
        }
    }

    /// Debit `amount` from `user_id`.
    pub async fn apply_debit(
        &self,
        user_id: UserId,
        amount: Cents,
    ) -> Result<Transaction, ApplyError> {
        let tx = self
            .ledger
            .open(&NewTransaction::debit(user_id, amount))
            .await?;

        match self.balances.debit(user_id, amount).await {
            Ok(_) => self.complete(tx).await,
            Err(e) => Err(self.fail(tx, e).await),
        }
    }

    /// Move `amount` from `from` to `to`, compensating on partial failure.
    pub async fn apply_transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Cents,
    ) -> Result<Transaction, ApplyError> {
        if from == to {
            return Err(ApplyError::rejected(LedgerError::SameAccountTransfer));
        }
        let tx = self
            .ledger
            .open(&NewTransaction::transfer(from, to, amount))
            .await?;

        // Step 1: source debit
        if let Err(e) = self.balances.debit(from, amount).await {
            return Err(self.fail(tx, e).await);
        }

        // Step 2: destination credit
        let credit_err = match self.balances.credit(to, amount).await {
            Ok(_) => return self.complete(tx).await,
            Err(e) => e,
        };

        warn!(
            tx_id = tx.id,
            from,
            to,
            amount,
            error = %credit_err,
            "Transfer credit failed, compensating source"
        );

        // Step 3: compensation
        match self.balances.credit(from, amount).await {
            Ok(_) => {
                info!(tx_id = tx.id, user_id = from, amount, "Transfer rolled back");
                Err(self.fail(tx, credit_err).await)
            }
            Err(comp_err) => {
                error!(
                    severity = "critical",
                    tx_id = tx.id,
                    user_id = from,
                    amount,
                    credit_error = %credit_err,
                    compensation_error = %comp_err,
                    "Compensation failed: funds debited from source were not returned"
                );
                let critical = LedgerError::CompensationFailed {
                    transaction_id: tx.id,
                    user_id: from,
                    amount,
                    cause: format!(
                        "credit failed: {}; compensation failed: {}",
                        credit_err, comp_err
                    ),
                };
                Err(self.fail(tx, critical).await)
            }
        }
    }

    /// Finalize a transaction whose balance mutation already applied.
    ///
    /// If the completed status cannot be stored, the mutation stands and the
    /// returned record is the stored `pending` row.
    async fn complete(&self, mut tx: Transaction) -> Result<Transaction, ApplyError> {
        if let Err(e) = self.ledger.complete(&mut tx).await {
            error!(
                tx_id = tx.id,
                kind = %tx.kind,
                amount = tx.amount_cents,
                error = %e,
                "Failed to persist completed transaction, balance change stands"
            );
            return Err(ApplyError::with_record(tx, e));
        }

        record_best_effort(
            self.audit.as_ref(),
            "transaction",
            &tx.id.to_string(),
            tx.kind.as_str(),
            json!({
                "from_user_id": tx.from_user_id,
                "to_user_id": tx.to_user_id,
                "amount_cents": tx.amount_cents,
                "status": tx.status.as_str(),
            }),
        )
        .await;

        info!(tx_id = tx.id, kind = %tx.kind, amount = tx.amount_cents, "Transaction completed");
        Ok(tx)
    }

    /// Mark `tx` failed with `cause` and hand the cause back to the caller.
    ///
    /// If the failed status cannot be stored, the storage error is returned
    /// instead (the cause is kept in its message) with the stored `pending`
    /// row. A critical cause is never downgraded.
    async fn fail(&self, mut tx: Transaction, cause: LedgerError) -> ApplyError {
        if let Err(e) = self.ledger.fail(&mut tx, &cause.to_string()).await {
            error!(
                tx_id = tx.id,
                kind = %tx.kind,
                cause = %cause,
                error = %e,
                "Failed to persist failed transaction"
            );
            if cause.severity() == Severity::Critical {
                return ApplyError::with_record(tx, cause);
            }
            let storage = LedgerError::StorageUnavailable(format!(
                "{}; unrecorded failure: {}",
                e, cause
            ));
            return ApplyError::with_record(tx, storage);
        }
        info!(tx_id = tx.id, kind = %tx.kind, code = cause.code(), "Transaction failed");
        ApplyError::with_record(tx, cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::store::mock::FlakyStore;
    use crate::store::{LedgerStore, MemoryStore};
    use crate::transaction::{TxKind, TxStatus};

    struct Fixture {
        orchestrator: TransferOrchestrator,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture(store: Arc<dyn LedgerStore>) -> Fixture {
        let audit = Arc::new(MemoryAuditLog::new());
        let balances = Arc::new(BalanceStore::new(store.clone(), audit.clone()));
        let orchestrator =
            TransferOrchestrator::new(balances, TransactionLedger::new(store), audit.clone());
        Fixture {
            orchestrator,
            audit,
        }
    }

    async fn balance_of(o: &TransferOrchestrator, user_id: UserId) -> Cents {
        o.balances().balance(user_id).await.unwrap().amount_cents()
    }

    #[tokio::test]
    async fn test_credit_completes_and_audits() {
        let f = fixture(Arc::new(MemoryStore::new()));
        let tx = f.orchestrator.apply_credit(1, 5000).await.unwrap();

        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(tx.kind, TxKind::Credit);
        assert_eq!(tx.to_user_id, Some(1));
        assert_eq!(balance_of(&f.orchestrator, 1).await, 5000);

        let entries = f.audit.entries_for("transaction");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, tx.id.to_string());
        assert_eq!(entries[0].action, "credit");
        assert_eq!(entries[0].details["amount_cents"], 5000);
    }

    #[tokio::test]
    async fn test_debit_insufficient_marks_failed() {
        let f = fixture(Arc::new(MemoryStore::new()));
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        let err = f.orchestrator.apply_debit(1, 1500).await.unwrap_err();
        assert!(matches!(err.kind(), LedgerError::InsufficientFunds { .. }));
        let tx = err.transaction.expect("failed record");
        assert_eq!(tx.status, TxStatus::Failed);
        assert!(tx.failure_cause.is_some());

        let stored = f.orchestrator.ledger().get(tx.id).await.unwrap();
        assert_eq!(stored.status, TxStatus::Failed);
        assert_eq!(balance_of(&f.orchestrator, 1).await, 1000);
        // Only the successful credit is audited as a transaction
        assert_eq!(f.audit.entries_for("transaction").len(), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_without_record() {
        let f = fixture(Arc::new(MemoryStore::new()));

        let err = f.orchestrator.apply_transfer(1, 1, 100).await.unwrap_err();
        assert_eq!(*err.kind(), LedgerError::SameAccountTransfer);
        assert!(err.transaction.is_none());

        let err = f.orchestrator.apply_credit(1, 0).await.unwrap_err();
        assert_eq!(*err.kind(), LedgerError::InvalidAmount);
        assert!(err.transaction.is_none());

        assert!(f.orchestrator.ledger().latest(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_success() {
        let f = fixture(Arc::new(MemoryStore::new()));
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        let tx = f.orchestrator.apply_transfer(1, 2, 400).await.unwrap();
        assert_eq!(tx.kind, TxKind::Transfer);
        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(balance_of(&f.orchestrator, 1).await, 600);
        assert_eq!(balance_of(&f.orchestrator, 2).await, 400);
    }

    #[tokio::test]
    async fn test_transfer_credit_failure_is_compensated() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture(store.clone());
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        store.set_fail_user(2, true);
        let err = f.orchestrator.apply_transfer(1, 2, 400).await.unwrap_err();

        assert!(matches!(err.kind(), LedgerError::StorageUnavailable(_)));
        let tx = err.transaction.expect("failed record");
        assert_eq!(tx.status, TxStatus::Failed);

        store.set_fail_user(2, false);
        assert_eq!(balance_of(&f.orchestrator, 1).await, 1000);
        assert_eq!(balance_of(&f.orchestrator, 2).await, 0);
    }

    #[tokio::test]
    async fn test_compensation_failure_is_critical() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture(store.clone());
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        // Debit write succeeds, destination credit and compensation both fail
        store.fail_after_writes(1);
        let err = f.orchestrator.apply_transfer(1, 2, 400).await.unwrap_err();

        assert_eq!(err.kind().severity(), Severity::Critical);
        let LedgerError::CompensationFailed {
            user_id, amount, ..
        } = err.kind()
        else {
            panic!("expected CompensationFailed, got {:?}", err.kind());
        };
        assert_eq!((*user_id, *amount), (1, 400));

        let tx = err.transaction.expect("failed record");
        assert_eq!(tx.status, TxStatus::Failed);
        let cause = tx.failure_cause.unwrap();
        assert!(cause.contains("compensation failed"));
        assert_eq!(balance_of(&f.orchestrator, 1).await, 600);
    }

    #[tokio::test]
    async fn test_unrecorded_failure_returns_storage_error() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture(store.clone());
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        store.set_fail_tx_updates(true);
        let err = f.orchestrator.apply_debit(1, 1500).await.unwrap_err();

        let LedgerError::StorageUnavailable(msg) = err.kind() else {
            panic!("expected StorageUnavailable, got {:?}", err.kind());
        };
        assert!(msg.contains("Insufficient funds"), "{msg}");
        let tx = err.transaction.expect("stored record");
        assert_eq!(tx.status, TxStatus::Pending);
        assert!(tx.failure_cause.is_none());

        let stored = f.orchestrator.ledger().get(tx.id).await.unwrap();
        assert_eq!(stored.status, TxStatus::Pending);
        assert_eq!(balance_of(&f.orchestrator, 1).await, 1000);
    }

    #[tokio::test]
    async fn test_unrecorded_completion_keeps_balance_change() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture(store.clone());
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        store.set_fail_tx_updates(true);
        let err = f.orchestrator.apply_credit(1, 200).await.unwrap_err();

        assert!(matches!(err.kind(), LedgerError::StorageUnavailable(_)));
        let tx = err.transaction.expect("stored record");
        assert_eq!(tx.status, TxStatus::Pending);
        let stored = f.orchestrator.ledger().get(tx.id).await.unwrap();
        assert_eq!(stored.status, tx.status);
        assert_eq!(balance_of(&f.orchestrator, 1).await, 1200);
        // Not audited as a completed transaction
        assert_eq!(f.audit.entries_for("transaction").len(), 1);
    }

    #[tokio::test]
    async fn test_unrecorded_compensation_failure_stays_critical() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture(store.clone());
        f.orchestrator.apply_credit(1, 1000).await.unwrap();

        store.fail_after_writes(1);
        store.set_fail_tx_updates(true);
        let err = f.orchestrator.apply_transfer(1, 2, 400).await.unwrap_err();

        assert!(matches!(err.kind(), LedgerError::CompensationFailed { .. }));
        assert_eq!(err.transaction.unwrap().status, TxStatus::Pending);
    }
}
