//! Domain events
//!
//! Typed events published by the ledger core (currently
//! `transaction.scheduled`) and the in-process bus that dispatches them.

pub mod bus;

pub use bus::{EventBus, EventHandler, InMemoryEventBus, SubscriptionId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

/// Event type emitted by the scheduler on every fire.
pub const TRANSACTION_SCHEDULED: &str = "transaction.scheduled";

/// Domain event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique, time-ordered event id
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub aggregate_id: String,
    pub version: u32,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            version: 1,
            data,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
