/// ENFORCED BALANCE TYPE - Used by BalanceStore
///
/// This is the SINGLE source of truth for balance arithmetic.
/// ALL balance mutations MUST go through these methods.
///
/// # Enforcement Strategy:
/// 1. Fields are PRIVATE - no direct access
/// 2. All mutations return Result - errors are explicit
/// 3. checked_add/sub - overflow protection
/// 4. `amount >= 0` is checked on every mutation and on load
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{Cents, UserId};
use crate::error::LedgerError;

/// Current balance of one account
///
/// # Invariants (ENFORCED by private fields):
/// - amount_cents >= 0, always
/// - last_updated moves on every successful mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    user_id: UserId,
    amount_cents: Cents,
    last_updated: DateTime<Utc>,
}

impl Balance {
    /// Fresh zero balance (get-or-create path).
    pub fn zero(user_id: UserId) -> Self {
        Self {
            user_id,
            amount_cents: 0,
            last_updated: Utc::now(),
        }
    }

    /// Rebuild a balance read back from storage.
    ///
    /// # Errors
    /// - `InvalidTransaction` if the stored amount is negative (corrupted row)
    pub fn restore(
        user_id: UserId,
        amount_cents: Cents,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if amount_cents < 0 {
            return Err(LedgerError::InvalidTransaction(format!(
                "stored balance for user {} is negative: {}",
                user_id, amount_cents
            )));
        }
        Ok(Self {
            user_id,
            amount_cents,
            last_updated,
        })
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    #[inline(always)]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    #[inline(always)]
    pub const fn amount_cents(&self) -> Cents {
        self.amount_cents
    }

    #[inline(always)]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Balance in major units (e.g. 12.50)
    pub fn amount_major(&self) -> Decimal {
        crate::money::cents_to_major(self.amount_cents)
    }

    // ============================================================
    // VALIDATED MUTATIONS
    // ============================================================

    /// Add funds.
    ///
    /// # Errors
    /// - `InvalidAmount` if amount <= 0
    /// - `InvalidTransaction` on i64 overflow
    pub fn credit(&mut self, amount: Cents) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.amount_cents = self.amount_cents.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidTransaction(format!("credit overflow for user {}", self.user_id))
        })?;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Remove funds.
    ///
    /// # Errors
    /// - `InvalidAmount` if amount <= 0
    /// - `InsufficientFunds` if balance < amount
    pub fn debit(&mut self, amount: Cents) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if self.amount_cents < amount {
            return Err(LedgerError::InsufficientFunds {
                user_id: self.user_id,
                available: self.amount_cents,
                requested: amount,
            });
        }
        self.amount_cents -= amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Snapshot of the current value for the history table.
    pub fn snapshot(&self) -> BalanceHistory {
        BalanceHistory {
            id: 0,
            user_id: self.user_id,
            amount_cents: self.amount_cents,
            created_at: self.last_updated,
        }
    }
}

/// Append-only snapshot written after every successful mutation.
///
/// `id` is assigned by the store on append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceHistory {
    pub id: u64,
    pub user_id: UserId,
    pub amount_cents: Cents,
    pub created_at: DateTime<Utc>,
}
