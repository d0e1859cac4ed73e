//! Audit sink
//!
//! The ledger reports every value-moving outcome as an
//! `(entity_type, entity_id, action, details)` tuple. Recording is best-effort:
//! a failing sink is logged and never fails the financial operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::LedgerError;

/// One recorded audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Audit collaborator
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        details: serde_json::Value,
    ) -> Result<(), LedgerError>;
}

/// Record an entry, logging instead of propagating a sink failure.
pub async fn record_best_effort(
    sink: &dyn AuditSink,
    entity_type: &str,
    entity_id: &str,
    action: &str,
    details: serde_json::Value,
) {
    if let Err(e) = sink.record(entity_type, entity_id, action, details).await {
        warn!(
            entity_type,
            entity_id,
            action,
            error = %e,
            "Audit record failed"
        );
    }
}

/// Emits audit entries as structured events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        details: serde_json::Value,
    ) -> Result<(), LedgerError> {
        info!(
            target: crate::logging::AUDIT_TARGET,
            entity_type,
            entity_id,
            action,
            details = %details,
            "Audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory; used by tests and by callers that want to
/// inspect the trail.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Entries for one entity type, in recording order.
    pub fn entries_for(&self, entity_type: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.entity_type == entity_type)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        details: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let entry = AuditEntry {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            details,
            recorded_at: Utc::now(),
        };
        self.entries
            .lock()
            .map_err(|_| LedgerError::StorageUnavailable("audit log poisoned".into()))?
            .push(entry);
        Ok(())
    }
}
