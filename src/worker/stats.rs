//! Lock-free transaction statistics.
//!
//! Counters tolerate momentary inconsistency between fields; a snapshot is
//! a set of independent relaxed loads.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::core_types::Cents;

#[derive(Debug, Default)]
pub struct TransactionStats {
    pub total: AtomicU64,
    pub successful: AtomicU64,
    pub failed: AtomicU64,
    /// Jobs dequeued but not yet finished
    pub pending: AtomicI64,
    /// Sum of successfully applied amounts
    pub total_amount_cents: AtomicI64,
    /// Unix millis of the last finished job (0 = none yet)
    pub last_transaction_ms: AtomicI64,
    /// Submissions rejected with QueueFull
    pub queue_full: AtomicU64,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job taken off the queue.
    #[inline]
    pub fn record_dequeued(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Job finished.
    #[inline]
    pub fn record_outcome(&self, success: bool, amount: Cents) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
            self.total_amount_cents.fetch_add(amount, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_transaction_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.pending.store(0, Ordering::Relaxed);
        self.total_amount_cents.store(0, Ordering::Relaxed);
        self.last_transaction_ms.store(0, Ordering::Relaxed);
        self.queue_full.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransactionStatsSnapshot {
        TransactionStatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            total_amount_cents: self.total_amount_cents.load(Ordering::Relaxed),
            last_transaction_ms: self.last_transaction_ms.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
        }
    }

    pub fn job_counts(&self) -> JobCounts {
        JobCounts {
            ok_count: self.successful.load(Ordering::Relaxed),
            failed_count: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionStatsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub pending: i64,
    pub total_amount_cents: i64,
    pub last_transaction_ms: i64,
    pub queue_full: u64,
}

impl TransactionStatsSnapshot {
    /// Successful jobs as a percentage of all dequeued jobs.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64 * 100.0
    }

    /// Mean successful amount in major units, two decimal places.
    pub fn average_amount_major(&self) -> Decimal {
        if self.successful == 0 {
            return Decimal::ZERO;
        }
        (crate::money::cents_to_major(self.total_amount_cents) / Decimal::from(self.successful))
            .round_dp(2)
    }
}

impl fmt::Display for TransactionStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction Stats: total={}, ok={}, failed={}, pending={}, amount={}, queue_full={}",
            self.total,
            self.successful,
            self.failed,
            self.pending,
            crate::money::cents_to_major(self.total_amount_cents),
            self.queue_full
        )
    }
}

/// Minimal stats surface: `{ok_count, failed_count}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub ok_count: u64,
    pub failed_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = TransactionStats::new();
        stats.record_dequeued();
        stats.record_dequeued();
        assert_eq!(stats.snapshot().pending, 2);

        stats.record_outcome(true, 500);
        stats.record_outcome(false, 300);

        let snap = stats.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.successful, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.total_amount_cents, 500);
        assert!(snap.last_transaction_ms > 0);
        assert_eq!(
            stats.job_counts(),
            JobCounts {
                ok_count: 1,
                failed_count: 1
            }
        );
    }

    #[test]
    fn test_derived_values() {
        let stats = TransactionStats::new();
        assert_eq!(stats.snapshot().success_rate(), 0.0);
        assert_eq!(stats.snapshot().average_amount_major(), Decimal::ZERO);

        for amount in [100, 200, 301] {
            stats.record_dequeued();
            stats.record_outcome(true, amount);
        }
        stats.record_dequeued();
        stats.record_outcome(false, 999);

        let snap = stats.snapshot();
        assert_eq!(snap.success_rate(), 75.0);
        assert_eq!(snap.average_amount_major(), Decimal::new(200, 2));
    }

    #[test]
    fn test_reset() {
        let stats = TransactionStats::new();
        stats.record_dequeued();
        stats.record_outcome(true, 10);
        stats.incr_queue_full();
        stats.reset();
        assert_eq!(
            stats.snapshot(),
            TransactionStatsSnapshot {
                total: 0,
                successful: 0,
                failed: 0,
                pending: 0,
                total_amount_cents: 0,
                last_transaction_ms: 0,
                queue_full: 0,
            }
        );
    }
}
