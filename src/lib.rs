//! Bank Ledger - balance core with transactional transfers
//!
//! Integer-cent balances, a persisted transaction state machine, transfers
//! with compensation, a bounded worker pool, batches, and cron-scheduled
//! recurring transactions published on an in-process event bus.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier and amount aliases
//! - [`error`] - Error taxonomy
//! - [`money`] - Cents / major-unit conversion
//! - [`balance`] - Balance value type and history snapshots
//! - [`store`] - Persistence collaborator (memory, PostgreSQL)
//! - [`balance_store`] - Per-user serialized balance mutations
//! - [`transaction`] - Transaction record and ledger
//! - [`orchestrator`] - Credit / debit / transfer with compensation
//! - [`audit`] - Audit trail collaborator
//! - [`events`] - Domain events and the event bus
//! - [`worker`] - Worker pool, batches, stats
//! - [`scheduler`] - Cron-driven scheduled transactions
//! - [`service`] - Wiring from configuration

// Core types - must be first!
pub mod core_types;
pub mod error;

pub mod audit;
pub mod balance;
pub mod balance_store;
pub mod config;
pub mod events;
pub mod logging;
pub mod money;
pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod transaction;
pub mod worker;


// Convenient re-exports at crate root
pub use balance::{Balance, BalanceHistory};
pub use balance_store::BalanceStore;
pub use core_types::{Cents, TxId, UserId};
pub use error::{ApplyError, LedgerError, Severity};
pub use events::{DomainEvent, EventBus, InMemoryEventBus, TRANSACTION_SCHEDULED};
pub use orchestrator::TransferOrchestrator;
pub use scheduler::{ScheduledTransaction, Scheduler};
pub use service::LedgerService;
pub use store::{LedgerStore, MemoryStore, PgLedgerStore};
pub use transaction::{NewTransaction, Transaction, TransactionLedger, TxKind, TxStatus};
pub use worker::{
    Batch, BatchProcessor, BatchStatus, CancelToken, Job, JobResult, TransactionStats,
    TransactionStatsSnapshot, WorkerPool,
};
