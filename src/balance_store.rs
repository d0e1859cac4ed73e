//! BalanceStore - per-account balance mutation
//!
//! Every mutation of one account is serialized by that account's lock.
//! Two-account operations take both locks in ascending `UserId` order, so two
//! transfers over the same pair in opposite directions cannot deadlock.
//!
//! After a successful write the store appends a history snapshot and records
//! a `balance` audit entry. Both are best-effort: the balance row is the
//! source of truth and a failed snapshot is only logged.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::audit::{AuditSink, record_best_effort};
use crate::balance::{Balance, BalanceHistory};
use crate::core_types::{Cents, UserId};
use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Guards held for the duration of one mutation.
type AccountGuard = OwnedMutexGuard<()>;

pub struct BalanceStore {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl BalanceStore {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            locks: DashMap::new(),
        }
    }

    fn lock_handle(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn lock_account(&self, user_id: UserId) -> AccountGuard {
        self.lock_handle(user_id).lock_owned().await
    }

    /// Lock two distinct accounts in ascending id order.
    async fn lock_pair(&self, a: UserId, b: UserId) -> (AccountGuard, AccountGuard) {
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let g1 = self.lock_account(first).await;
        let g2 = self.lock_account(second).await;
        (g1, g2)
    }

    /// Existing balance, or a new zero balance.
    pub async fn get_or_create(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        self.store.get_or_create_balance(user_id).await
    }

    /// Current balance (same as `get_or_create`; balances are created lazily).
    pub async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        self.get_or_create(user_id).await
    }

    /// History snapshots, newest first.
    pub async fn history(
        &self,
        user_id: UserId,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        self.store.balance_history(user_id, as_of, limit).await
    }

    /// Add `amount` to the account.
    ///
    /// # Errors
    /// - `InvalidAmount` if amount <= 0
    /// - `StorageUnavailable` if the balance row cannot be written
    pub async fn credit(&self, user_id: UserId, amount: Cents) -> Result<Balance, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let _guard = self.lock_account(user_id).await;

        let mut balance = self.store.get_or_create_balance(user_id).await?;
        balance.credit(amount)?;
        self.store.save_balance(&balance).await?;

        debug!(user_id, amount, balance = balance.amount_cents(), "Credited");
        self.after_mutation(&balance, "credit", amount).await;
        Ok(balance)
    }

    /// Subtract `amount` from the account.
    ///
    /// # Errors
    /// - `InvalidAmount` if amount <= 0
    /// - `InsufficientFunds` if the balance is below `amount` (nothing written)
    /// - `StorageUnavailable` if the balance row cannot be written
    pub async fn debit(&self, user_id: UserId, amount: Cents) -> Result<Balance, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let _guard = self.lock_account(user_id).await;

        let mut balance = self.store.get_or_create_balance(user_id).await?;
        balance.debit(amount)?;
        self.store.save_balance(&balance).await?;

        debug!(user_id, amount, balance = balance.amount_cents(), "Debited");
        self.after_mutation(&balance, "debit", -amount).await;
        Ok(balance)
    }

    /// Move `amount` from `from` to `to` under both account locks.
    ///
    /// If the destination write fails, the source row is written back to its
    /// prior value before the error is returned.
    ///
    /// # Errors
    /// - `InvalidAmount` if amount <= 0
    /// - `SameAccountTransfer` if `from == to`
    /// - `InsufficientFunds` if the source balance is below `amount`
    pub async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Cents,
    ) -> Result<(Balance, Balance), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if from == to {
            return Err(LedgerError::SameAccountTransfer);
        }
        let _guards = self.lock_pair(from, to).await;

        let source_before = self.store.get_or_create_balance(from).await?;
        let mut source = source_before;
        let mut dest = self.store.get_or_create_balance(to).await?;

        source.debit(amount)?;
        dest.credit(amount)?;

        self.store.save_balance(&source).await?;
        if let Err(e) = self.store.save_balance(&dest).await {
            warn!(from, to, amount, error = %e, "Transfer credit write failed, restoring source");
            if let Err(restore_err) = self.store.save_balance(&source_before).await {
                error!(
                    severity = "critical",
                    user_id = from,
                    amount,
                    error = %restore_err,
                    "Failed to restore source balance after transfer write failure"
                );
                return Err(LedgerError::StorageUnavailable(format!(
                    "{}; restoring user {} also failed: {}",
                    e, from, restore_err
                )));
            }
            return Err(e);
        }

        debug!(from, to, amount, "Transferred");
        self.after_mutation(&source, "debit", -amount).await;
        self.after_mutation(&dest, "credit", amount).await;
        Ok((source, dest))
    }

    async fn after_mutation(&self, balance: &Balance, action: &str, delta: Cents) {
        if let Err(e) = self.store.append_history(balance.snapshot()).await {
            warn!(user_id = balance.user_id(), error = %e, "Failed to append balance history");
        }
        record_best_effort(
            self.audit.as_ref(),
            "balance",
            &balance.user_id().to_string(),
            action,
            json!({
                "delta": delta,
                "balance_after": balance.amount_cents(),
            }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::audit::mock::FailingAuditSink;
    use crate::store::MemoryStore;
    use crate::store::mock::FlakyStore;

    fn setup() -> (BalanceStore, Arc<MemoryAuditLog>) {
        let audit = Arc::new(MemoryAuditLog::new());
        let store = BalanceStore::new(Arc::new(MemoryStore::new()), audit.clone());
        (store, audit)
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let (store, audit) = setup();
        assert_eq!(store.credit(1, 5000).await.unwrap().amount_cents(), 5000);
        assert_eq!(store.debit(1, 1200).await.unwrap().amount_cents(), 3800);

        let history = store.history(1, None, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount_cents, 3800);

        let entries = audit.entries_for("balance");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, "debit");
        assert_eq!(entries[1].details["delta"], -1200);
        assert_eq!(entries[1].details["balance_after"], 3800);
    }

    #[tokio::test]
    async fn test_invalid_amount_does_not_create_row() {
        let (store, _) = setup();
        assert_eq!(store.credit(1, 0).await, Err(LedgerError::InvalidAmount));
        assert_eq!(store.debit(1, -3).await, Err(LedgerError::InvalidAmount));
        assert!(store.history(1, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_debit_insufficient_funds() {
        let (store, _) = setup();
        store.credit(1, 1000).await.unwrap();
        let err = store.debit(1, 1500).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(store.balance(1).await.unwrap().amount_cents(), 1000);
    }

    #[tokio::test]
    async fn test_transfer_conserves_total() {
        let (store, _) = setup();
        store.credit(1, 1000).await.unwrap();
        let (a, b) = store.transfer(1, 2, 400).await.unwrap();
        assert_eq!(a.amount_cents(), 600);
        assert_eq!(b.amount_cents(), 400);

        assert_eq!(
            store.transfer(1, 1, 10).await,
            Err(LedgerError::SameAccountTransfer)
        );
        assert!(matches!(
            store.transfer(2, 1, 401).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_transfer_restores_source_on_write_failure() {
        let flaky = Arc::new(FlakyStore::new());
        let store = BalanceStore::new(flaky.clone(), Arc::new(MemoryAuditLog::new()));
        store.credit(1, 1000).await.unwrap();

        flaky.set_fail_user(2, true);
        assert!(matches!(
            store.transfer(1, 2, 400).await,
            Err(LedgerError::StorageUnavailable(_))
        ));
        assert_eq!(store.balance(1).await.unwrap().amount_cents(), 1000);
        assert_eq!(store.balance(2).await.unwrap().amount_cents(), 0);
    }

    #[tokio::test]
    async fn test_audit_and_history_failures_are_not_fatal() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.set_fail_history(true);
        let store = BalanceStore::new(flaky, Arc::new(FailingAuditSink));
        assert_eq!(store.credit(1, 10).await.unwrap().amount_cents(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_do_not_deadlock() {
        let (store, _) = setup();
        let store = Arc::new(store);
        store.credit(1, 10_000).await.unwrap();
        store.credit(2, 10_000).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..100 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    s.transfer(1, 2, 10).await
                } else {
                    s.transfer(2, 1, 10).await
                }
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let a = store.balance(1).await.unwrap().amount_cents();
        let b = store.balance(2).await.unwrap().amount_cents();
        assert_eq!(a, 10_000);
        assert_eq!(b, 10_000);
    }
}
