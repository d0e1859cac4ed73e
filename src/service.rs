//! Service wiring.
//!
//! Builds every component from an [`AppConfig`] and connects the scheduler to
//! the worker pool: a `transaction.scheduled` event becomes a pool job.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::balance_store::BalanceStore;
use crate::config::AppConfig;
use crate::error::LedgerError;
use crate::events::{
    DomainEvent, EventBus, EventHandler, InMemoryEventBus, SubscriptionId, TRANSACTION_SCHEDULED,
};
use crate::orchestrator::TransferOrchestrator;
use crate::scheduler::{ScheduledTransaction, Scheduler};
use crate::store::{LedgerStore, MemoryStore, PgLedgerStore};
use crate::transaction::TransactionLedger;
use crate::worker::{BatchProcessor, CancelToken, Job, JobResult, WorkerPool};

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    bus: Arc<InMemoryEventBus>,
    orchestrator: Arc<TransferOrchestrator>,
    pool: Arc<WorkerPool>,
    batches: BatchProcessor,
    scheduler: Scheduler,
    scheduler_enabled: bool,
    result_timeout: Duration,
    bridge: SubscriptionId,
}

impl LedgerService {
    /// Connect storage (PostgreSQL when `postgres_url` is set, memory
    /// otherwise) and build the service. Workers are running on return; the
    /// scheduler starts with [`LedgerService::start`].
    pub async fn from_config(config: &AppConfig) -> Result<Self, LedgerError> {
        let store: Arc<dyn LedgerStore> = match &config.postgres_url {
            Some(url) => {
                info!("Using PostgreSQL ledger store");
                Arc::new(PgLedgerStore::connect(url).await?)
            }
            None => {
                info!("Using in-memory ledger store");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store, Arc::new(TracingAuditSink)).await
    }

    pub async fn with_store(
        config: &AppConfig,
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, LedgerError> {
        let balances = Arc::new(BalanceStore::new(store.clone(), audit.clone()));
        let ledger = TransactionLedger::new(store.clone());
        let orchestrator = Arc::new(TransferOrchestrator::new(balances, ledger, audit));

        let pool = Arc::new(WorkerPool::start(
            orchestrator.clone(),
            config.worker.workers,
            config.worker.effective_queue_capacity(),
        ));
        let batches = BatchProcessor::new(
            pool.clone(),
            config.batch.max_batch_size,
            config.batch.batch_timeout(),
        );

        let bus = Arc::new(InMemoryEventBus::new());
        let bridge = bus.subscribe(TRANSACTION_SCHEDULED, scheduled_job_bridge(pool.clone()))?;
        let scheduler = Scheduler::new(bus.clone()).await?;

        Ok(Self {
            store,
            bus,
            orchestrator,
            pool,
            batches,
            scheduler,
            scheduler_enabled: config.scheduler.enabled,
            result_timeout: config.worker.result_timeout(),
            bridge,
        })
    }

    pub async fn start(&self) -> Result<(), LedgerError> {
        if self.scheduler_enabled {
            self.scheduler.start().await?;
        } else {
            info!("Scheduler disabled");
        }
        Ok(())
    }

    /// Stop the scheduler, then drain the worker pool.
    pub async fn shutdown(&self) {
        if self.scheduler_enabled
            && let Err(e) = self.scheduler.shutdown().await
        {
            warn!(error = %e, "Scheduler shutdown failed");
        }
        self.bus.unsubscribe(TRANSACTION_SCHEDULED, self.bridge);
        self.pool.shutdown().await;
        info!("Ledger service stopped");
    }

    /// Run one job through the pool and wait for its result, bounded by
    /// `worker.result_timeout_ms`.
    ///
    /// # Errors
    /// - `QueueFull` / `PoolClosed` from submission
    /// - `Cancelled` if the wait timed out (the job may still run)
    pub async fn execute(&self, job: Job) -> Result<JobResult, LedgerError> {
        self.pool.execute(job, self.result_timeout).await
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn balances(&self) -> &Arc<BalanceStore> {
        self.orchestrator.balances()
    }

    pub fn ledger(&self) -> &TransactionLedger {
        self.orchestrator.ledger()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn batches(&self) -> &BatchProcessor {
        &self.batches
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

/// Handler turning a scheduled-transaction event into a queued job.
///
/// The job is fire-and-forget: its outcome lands in the ledger and the pool
/// stats. A full queue is reported back to the publisher as an error.
pub fn scheduled_job_bridge(pool: Arc<WorkerPool>) -> EventHandler {
    Arc::new(move |event: &DomainEvent| -> Result<(), LedgerError> {
        let definition: ScheduledTransaction = serde_json::from_value(event.data.clone())
            .map_err(|e| {
                LedgerError::EventHandler(format!("invalid scheduled transaction payload: {e}"))
            })?;
        let job = definition.to_job()?;
        let ticket = pool.submit(job, &CancelToken::new())?;
        info!(
            schedule_id = %definition.id,
            job_id = %ticket.id(),
            "Scheduled transaction queued"
        );
        Ok(())
    })
}
