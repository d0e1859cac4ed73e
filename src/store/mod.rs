//! Persistence collaborator
//!
//! The ledger core never talks to a database directly. Every read and write
//! of a balance row, history snapshot or transaction row goes through
//! [`LedgerStore`], which is injected into the components that need it.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::balance::{Balance, BalanceHistory};
use crate::core_types::{TxId, UserId};
use crate::error::LedgerError;
use crate::transaction::Transaction;

/// Storage operations required by the ledger core.
///
/// Implementations only need per-row atomicity: mutual exclusion across a
/// read-modify-write is provided by `BalanceStore`'s account locks.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Return the balance row for `user_id`, creating it at zero if absent.
    async fn get_or_create_balance(&self, user_id: UserId) -> Result<Balance, LedgerError>;

    /// Overwrite the balance row.
    async fn save_balance(&self, balance: &Balance) -> Result<(), LedgerError>;

    /// Append a history snapshot, returning it with its assigned id.
    async fn append_history(
        &self,
        snapshot: BalanceHistory,
    ) -> Result<BalanceHistory, LedgerError>;

    /// History for one user, newest first. With `as_of`, only snapshots
    /// taken at or before that instant are returned.
    async fn balance_history(
        &self,
        user_id: UserId,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<BalanceHistory>, LedgerError>;

    /// Insert a new transaction row, returning it with its assigned id.
    async fn insert_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError>;

    /// Persist a status change.
    ///
    /// # Errors
    /// - `NotFound` if the row does not exist
    /// - `IllegalStateTransition` if the stored row is already terminal
    async fn update_transaction(&self, tx: &Transaction) -> Result<(), LedgerError>;

    async fn get_transaction(&self, id: TxId) -> Result<Option<Transaction>, LedgerError>;

    /// Most recent transactions, newest first.
    async fn latest_transactions(&self, limit: usize) -> Result<Vec<Transaction>, LedgerError>;
}
