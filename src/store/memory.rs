//! In-memory ledger store.
//!
//! Balances, history and transactions live in DashMaps; ids come from atomic
//! sequences. Used when no database URL is configured and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::LedgerStore;
use crate::balance::{Balance, BalanceHistory};
use crate::core_types::{TxId, UserId};
use crate::error::LedgerError;
use crate::transaction::Transaction;

/// Thread-safe in-memory store.
pub struct MemoryStore {
    balances: DashMap<UserId, Balance>,
    /// Per-user snapshots in append order
    history: DashMap<UserId, Vec<BalanceHistory>>,
    transactions: DashMap<TxId, Transaction>,
    next_history_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            history: DashMap::new(),
            transactions: DashMap::new(),
            next_history_id: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
        }
    }

    /// Number of balance rows.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_or_create_balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        let entry = self
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::zero(user_id));
        Ok(*entry)
    }

    async fn save_balance(&self, balance: &Balance) -> Result<(), LedgerError> {
        if balance.amount_cents() < 0 {
            return Err(LedgerError::InvalidTransaction(format!(
                "refusing to store negative balance for user {}",
                balance.user_id()
            )));
        }
        self.balances.insert(balance.user_id(), *balance);
        Ok(())
    }

    async fn append_history(
        &self,
        mut snapshot: BalanceHistory,
    ) -> Result<BalanceHistory, LedgerError> {
        snapshot.id = self.next_history_id.fetch_add(1, Ordering::Relaxed);
        self.history
            .entry(snapshot.user_id)
            .or_default()
            .push(snapshot.clone());
        Ok(snapshot)
    }

    async fn balance_history(
        &self,
        user_id: UserId,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        let Some(rows) = self.history.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .rev()
            .filter(|h| as_of.is_none_or(|ts| h.created_at <= ts))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_transaction(&self, mut tx: Transaction) -> Result<Transaction, LedgerError> {
        tx.id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        self.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut stored = self
            .transactions
            .get_mut(&tx.id)
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", tx.id)))?;
        if stored.status.is_terminal() {
            return Err(LedgerError::IllegalStateTransition {
                from: stored.status,
                to: tx.status,
            });
        }
        *stored = tx.clone();
        Ok(())
    }

    async fn get_transaction(&self, id: TxId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.transactions.get(&id).map(|tx| tx.value().clone()))
    }

    async fn latest_transactions(&self, limit: usize) -> Result<Vec<Transaction>, LedgerError> {
        let mut all: Vec<Transaction> = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all.truncate(limit);
        Ok(all)
    }
}
