//! Scheduler - cron-driven recurring transactions
//!
//! Each registered definition owns one cron job. On every fire the scheduler
//! publishes a `transaction.scheduled` event carrying the definition; it never
//! calls the orchestrator itself. Whoever subscribes to the event decides how
//! the transaction is executed.
//!
//! Expressions use the seconds-precision format (6 fields, or 7 with year):
//! `sec min hour day-of-month month day-of-week [year]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core_types::{Cents, UserId};
use crate::error::LedgerError;
use crate::events::{DomainEvent, EventBus, TRANSACTION_SCHEDULED};
use crate::transaction::{NewTransaction, TxKind};
use crate::worker::Job;

/// A recurring transaction definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTransaction {
    /// Caller-assigned identifier
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount_cents: Cents,
    /// Cron expression
    pub schedule: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ScheduledTransaction {
    pub fn transfer(
        id: impl Into<String>,
        from: UserId,
        to: UserId,
        amount_cents: Cents,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TxKind::Transfer,
            from_user_id: Some(from),
            to_user_id: Some(to),
            amount_cents,
            schedule: schedule.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn credit(
        id: impl Into<String>,
        user_id: UserId,
        amount_cents: Cents,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TxKind::Credit,
            from_user_id: None,
            to_user_id: Some(user_id),
            amount_cents,
            schedule: schedule.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn debit(
        id: impl Into<String>,
        user_id: UserId,
        amount_cents: Cents,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TxKind::Debit,
            from_user_id: Some(user_id),
            to_user_id: None,
            amount_cents,
            schedule: schedule.into(),
            metadata: HashMap::new(),
        }
    }

    /// Job executing one occurrence of this definition.
    pub fn to_job(&self) -> Result<Job, LedgerError> {
        let missing = |side: &str| {
            LedgerError::InvalidTransaction(format!("{} requires {}_user_id", self.kind, side))
        };
        let job = match self.kind {
            TxKind::Credit => Job::Credit {
                user_id: self.to_user_id.ok_or_else(|| missing("to"))?,
                amount: self.amount_cents,
            },
            TxKind::Debit => Job::Debit {
                user_id: self.from_user_id.ok_or_else(|| missing("from"))?,
                amount: self.amount_cents,
            },
            TxKind::Transfer => Job::Transfer {
                from: self.from_user_id.ok_or_else(|| missing("from"))?,
                to: self.to_user_id.ok_or_else(|| missing("to"))?,
                amount: self.amount_cents,
            },
        };
        Ok(job)
    }

    /// Registration checks: identifier, expression, amount, shape.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.id.trim().is_empty() {
            return Err(LedgerError::InvalidSchedule(
                "schedule id is required".into(),
            ));
        }
        validate_expression(&self.schedule)?;
        if self.amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        NewTransaction {
            kind: self.kind,
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            amount_cents: self.amount_cents,
        }
        .validate()
    }
}

/// Strict expression check: field count, then a full parse.
pub fn validate_expression(expr: &str) -> Result<(), LedgerError> {
    let fields = expr.split_whitespace().count();
    if fields == 0 {
        return Err(LedgerError::InvalidSchedule(
            "schedule is required".into(),
        ));
    }
    if !(6..=7).contains(&fields) {
        return Err(LedgerError::InvalidSchedule(format!(
            "expected 6 or 7 fields, got {}: {}",
            fields, expr
        )));
    }
    CronJob::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| LedgerError::InvalidSchedule(format!("{}: {}", expr, e)))
}

/// Registered definition plus its fire bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub definition: ScheduledTransaction,
    pub fire_count: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct FireCounter {
    count: AtomicU64,
    /// Unix millis, 0 = never
    last_ms: AtomicI64,
}

struct Entry {
    job_id: Uuid,
    definition: ScheduledTransaction,
    fired: Arc<FireCounter>,
}

pub struct Scheduler {
    cron: JobScheduler,
    bus: Arc<dyn EventBus>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Scheduler {
    pub async fn new(bus: Arc<dyn EventBus>) -> Result<Self, LedgerError> {
        let cron = JobScheduler::new()
            .await
            .map_err(|e| LedgerError::Scheduler(e.to_string()))?;
        Ok(Self {
            cron,
            bus,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Validate and register a definition.
    ///
    /// # Errors
    /// - `InvalidSchedule` for an empty id, a malformed expression or a
    ///   duplicate id
    /// - `InvalidAmount` / `InvalidTransaction` / `SameAccountTransfer` for
    ///   an invalid transaction shape
    pub async fn register(&self, definition: ScheduledTransaction) -> Result<(), LedgerError> {
        definition.validate()?;

        let mut entries = self.entries.lock().await;
        if entries.contains_key(&definition.id) {
            return Err(LedgerError::InvalidSchedule(format!(
                "schedule {} already registered",
                definition.id
            )));
        }

        let fired = Arc::new(FireCounter::default());
        let job = {
            let bus = self.bus.clone();
            let definition = definition.clone();
            let fired = fired.clone();
            CronJob::new_async(definition.schedule.clone().as_str(), move |_uuid, _lock| {
                let bus = bus.clone();
                let definition = definition.clone();
                let fired = fired.clone();
                Box::pin(async move {
                    fire(bus.as_ref(), &definition, &fired);
                })
            })
            .map_err(|e| LedgerError::InvalidSchedule(e.to_string()))?
        };

        let job_id = self
            .cron
            .add(job)
            .await
            .map_err(|e| LedgerError::Scheduler(e.to_string()))?;

        info!(
            schedule_id = %definition.id,
            schedule = %definition.schedule,
            kind = %definition.kind,
            amount = definition.amount_cents,
            "Scheduled transaction registered"
        );
        entries.insert(
            definition.id.clone(),
            Entry {
                job_id,
                definition,
                fired,
            },
        );
        Ok(())
    }

    /// Remove a definition and its trigger.
    pub async fn unregister(&self, id: &str) -> Result<ScheduledTransaction, LedgerError> {
        let entry = self
            .entries
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| LedgerError::ScheduleNotFound(id.to_string()))?;

        self.cron
            .remove(&entry.job_id)
            .await
            .map_err(|e| LedgerError::Scheduler(e.to_string()))?;
        info!(schedule_id = %id, "Scheduled transaction removed");
        Ok(entry.definition)
    }

    /// Change the expression of a registered definition.
    ///
    /// Implemented as unregister followed by register; the definition is
    /// lost if the process stops between the two steps.
    pub async fn update_schedule(&self, id: &str, schedule: &str) -> Result<(), LedgerError> {
        validate_expression(schedule)?;
        let mut definition = self.unregister(id).await?;
        definition.schedule = schedule.to_string();
        self.register(definition).await
    }

    pub async fn get(&self, id: &str) -> Option<ScheduleInfo> {
        self.entries.lock().await.get(id).map(Entry::info)
    }

    /// All registered definitions, ordered by id.
    pub async fn list(&self) -> Vec<ScheduleInfo> {
        let mut all: Vec<ScheduleInfo> = self.entries.lock().await.values().map(Entry::info).collect();
        all.sort_by(|a, b| a.definition.id.cmp(&b.definition.id));
        all
    }

    pub async fn start(&self) -> Result<(), LedgerError> {
        self.cron
            .start()
            .await
            .map_err(|e| LedgerError::Scheduler(e.to_string()))?;
        info!("Scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), LedgerError> {
        let mut cron = self.cron.clone();
        cron.shutdown()
            .await
            .map_err(|e| LedgerError::Scheduler(e.to_string()))?;
        info!("Scheduler stopped");
        Ok(())
    }
}

impl Entry {
    fn info(&self) -> ScheduleInfo {
        let last_ms = self.fired.last_ms.load(Ordering::Relaxed);
        ScheduleInfo {
            definition: self.definition.clone(),
            fire_count: self.fired.count.load(Ordering::Relaxed),
            last_fired_at: (last_ms > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }
}

fn fire(bus: &dyn EventBus, definition: &ScheduledTransaction, fired: &FireCounter) {
    let n = fired.count.fetch_add(1, Ordering::Relaxed) + 1;
    fired
        .last_ms
        .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

    let data = match serde_json::to_value(definition) {
        Ok(data) => data,
        Err(e) => {
            error!(schedule_id = %definition.id, error = %e, "Failed to encode scheduled transaction");
            return;
        }
    };
    let event = DomainEvent::new(TRANSACTION_SCHEDULED, definition.id.clone(), data)
        .with_metadata("source", "scheduler")
        .with_metadata("fire_count", n.to_string());

    match bus.publish(&event) {
        Ok(()) => info!(schedule_id = %definition.id, event_id = %event.id, fire = n, "Scheduled transaction fired"),
        Err(e) => warn!(
            schedule_id = %definition.id,
            event_id = %event.id,
            error = %e,
            "Failed to publish scheduled transaction event"
        ),
    }
}
