//! Ledger scenarios through the public API.
//!
//! - Non-negative balances under arbitrary operation sequences
//! - Conservation of funds across transfers
//! - Compensation leaves the source untouched
//! - Batches and schedules through the wired service

use async_trait::async_trait;
use bank_ledger::audit::MemoryAuditLog;
use bank_ledger::config::AppConfig;
use bank_ledger::{
    Balance, BalanceHistory, BalanceStore, BatchStatus, Job, LedgerError, LedgerService,
    LedgerStore, MemoryStore, ScheduledTransaction, Transaction, TransactionLedger,
    TransferOrchestrator, TxId, TxStatus, UserId,
};
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Memory store that rejects balance writes for one user while armed.
#[derive(Default)]
struct OutageStore {
    inner: MemoryStore,
    /// 0 = no outage
    down_user: AtomicU64,
}

#[async_trait]
impl LedgerStore for OutageStore {
    async fn get_or_create_balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        self.inner.get_or_create_balance(user_id).await
    }

    async fn save_balance(&self, balance: &Balance) -> Result<(), LedgerError> {
        if self.down_user.load(Ordering::SeqCst) == balance.user_id() {
            return Err(LedgerError::StorageUnavailable(format!(
                "balance row {} unavailable",
                balance.user_id()
            )));
        }
        self.inner.save_balance(balance).await
    }

    async fn append_history(&self, snapshot: BalanceHistory) -> Result<BalanceHistory, LedgerError> {
        self.inner.append_history(snapshot).await
    }

    async fn balance_history(
        &self,
        user_id: UserId,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        self.inner.balance_history(user_id, as_of, limit).await
    }

    async fn insert_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
        self.inner.insert_transaction(tx).await
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        self.inner.update_transaction(tx).await
    }

    async fn get_transaction(&self, id: TxId) -> Result<Option<Transaction>, LedgerError> {
        self.inner.get_transaction(id).await
    }

    async fn latest_transactions(&self, limit: usize) -> Result<Vec<Transaction>, LedgerError> {
        self.inner.latest_transactions(limit).await
    }
}

fn orchestrator(store: Arc<dyn LedgerStore>) -> TransferOrchestrator {
    let audit = Arc::new(MemoryAuditLog::new());
    let balances = Arc::new(BalanceStore::new(store.clone(), audit.clone()));
    TransferOrchestrator::new(balances, TransactionLedger::new(store), audit)
}

async fn balance_of(o: &TransferOrchestrator, user_id: UserId) -> i64 {
    o.balances().balance(user_id).await.unwrap().amount_cents()
}

#[tokio::test]
async fn test_transfer_compensated_when_destination_unavailable() {
    let store = Arc::new(OutageStore::default());
    let o = orchestrator(store.clone());
    o.apply_credit(1, 1000).await.unwrap();
    store.down_user.store(2, Ordering::SeqCst);

    let err = o.apply_transfer(1, 2, 400).await.unwrap_err();
    assert!(matches!(err.kind(), LedgerError::StorageUnavailable(_)));
    let tx = err.transaction.as_deref().unwrap();
    assert_eq!(tx.status, TxStatus::Failed);

    store.down_user.store(0, Ordering::SeqCst);
    assert_eq!(balance_of(&o, 1).await, 1000);
    assert_eq!(balance_of(&o, 2).await, 0);

    let stored = o.ledger().get(tx.id).await.unwrap();
    assert_eq!(stored.status, TxStatus::Failed);
    assert!(stored.failure_cause.is_some());
}

#[tokio::test]
async fn test_rejected_requests_leave_no_record() {
    let o = orchestrator(Arc::new(MemoryStore::new()));
    let same = o.apply_transfer(5, 5, 100).await.unwrap_err();
    assert_eq!(same.kind(), &LedgerError::SameAccountTransfer);
    assert!(same.transaction.is_none());

    let zero = o.apply_credit(5, 0).await.unwrap_err();
    assert_eq!(zero.kind(), &LedgerError::InvalidAmount);
    assert!(o.ledger().latest(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_balance_history_tracks_mutations() {
    let o = orchestrator(Arc::new(MemoryStore::new()));
    o.apply_credit(1, 700).await.unwrap();
    o.apply_debit(1, 200).await.unwrap();

    let history = o.balances().history(1, None, 10).await.unwrap();
    let amounts: Vec<i64> = history.iter().map(|h| h.amount_cents).collect();
    assert_eq!(amounts, vec![500, 700]);
}

#[tokio::test]
async fn test_batch_through_service() {
    let mut config = AppConfig::default();
    config.worker.workers = 2;
    config.scheduler.enabled = false;
    let service = LedgerService::from_config(&config).await.unwrap();
    service.start().await.unwrap();

    let jobs = vec![
        Job::Credit {
            user_id: 1,
            amount: 1000,
        },
        Job::Credit {
            user_id: 2,
            amount: 50,
        },
        Job::Debit {
            user_id: 3,
            amount: 10,
        },
    ];
    let batch = service
        .batches()
        .start_batch("nightly", jobs)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!((batch.succeeded, batch.failed), (2, 1));
    assert_eq!(batch.note.as_deref(), Some("1 jobs failed"));
    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_schedules_are_rejected() {
    let mut config = AppConfig::default();
    config.scheduler.enabled = false;
    let service = LedgerService::from_config(&config).await.unwrap();
    let scheduler = service.scheduler();

    let bad_cron = ScheduledTransaction::credit("s1", 1, 100, "every day");
    assert!(matches!(
        scheduler.register(bad_cron).await,
        Err(LedgerError::InvalidSchedule(_))
    ));

    let bad_amount = ScheduledTransaction::credit("s2", 1, 0, "0 0 * * * *");
    assert_eq!(
        scheduler.register(bad_amount).await,
        Err(LedgerError::InvalidAmount)
    );

    let ok = ScheduledTransaction::transfer("s3", 1, 2, 100, "0 0 12 * * *");
    scheduler.register(ok).await.unwrap();
    assert!(matches!(
        scheduler.update_schedule("s3", "nonsense").await,
        Err(LedgerError::InvalidSchedule(_))
    ));
    assert_eq!(
        scheduler.get("s3").await.unwrap().definition.schedule,
        "0 0 12 * * *"
    );
    assert!(matches!(
        scheduler.update_schedule("missing", "0 0 12 * * *").await,
        Err(LedgerError::ScheduleNotFound(_))
    ));
    service.shutdown().await;
}

#[derive(Debug, Clone)]
enum Op {
    Credit(UserId, i64),
    Debit(UserId, i64),
    Transfer(UserId, UserId, i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let user = 1u64..=4;
    let amount = 1i64..=2_000;
    prop_oneof![
        (user.clone(), amount.clone()).prop_map(|(u, a)| Op::Credit(u, a)),
        (user.clone(), amount.clone()).prop_map(|(u, a)| Op::Debit(u, a)),
        (user.clone(), user, amount).prop_map(|(f, t, a)| Op::Transfer(f, t, a)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balances_never_negative_and_funds_conserved(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let o = orchestrator(Arc::new(MemoryStore::new()));
            // net external inflow: applied credits minus applied debits
            let mut expected_total = 0i64;

            for op in ops {
                match op {
                    Op::Credit(u, a) => {
                        if o.apply_credit(u, a).await.is_ok() {
                            expected_total += a;
                        }
                    }
                    Op::Debit(u, a) => {
                        if o.apply_debit(u, a).await.is_ok() {
                            expected_total -= a;
                        }
                    }
                    Op::Transfer(f, t, a) => {
                        let before_f = balance_of(&o, f).await;
                        let before_t = balance_of(&o, t).await;
                        let applied = o.apply_transfer(f, t, a).await.is_ok();
                        let after_f = balance_of(&o, f).await;
                        let after_t = balance_of(&o, t).await;
                        if applied {
                            prop_assert_eq!(before_f - a, after_f);
                            prop_assert_eq!(before_t + a, after_t);
                        } else {
                            prop_assert_eq!(before_f, after_f);
                            prop_assert_eq!(before_t, after_t);
                        }
                    }
                }

                let mut total = 0;
                for u in 1..=4 {
                    let b = balance_of(&o, u).await;
                    prop_assert!(b >= 0, "user {} went negative: {}", u, b);
                    total += b;
                }
                prop_assert_eq!(total, expected_total);
            }
            Ok(())
        })?;
    }
}
