//! Money Conversion Module
//!
//! Conversion between the internal cents representation and client-facing
//! major-unit `Decimal` values. The ledger always stores and mutates `i64`
//! cents; these helpers exist only at the reporting boundary.
//!
//! ## Usage
//! ```rust
//! use bank_ledger::money::{cents_to_major, major_to_cents};
//! use rust_decimal::Decimal;
//!
//! let cents = major_to_cents(Decimal::new(1250, 2)).unwrap();
//! assert_eq!(cents, 1250);
//! assert_eq!(cents_to_major(1250).to_string(), "12.50");
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

use crate::core_types::Cents;

/// Decimal places of the minor unit.
pub const MINOR_UNIT_DECIMALS: u32 = 2;

/// Money conversion errors
#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,
}

/// Express an amount of cents in major units (e.g. 1250 -> 12.50).
#[inline]
pub fn cents_to_major(cents: Cents) -> Decimal {
    Decimal::new(cents, MINOR_UNIT_DECIMALS)
}

/// Convert a major-unit amount to cents.
///
/// # Errors
/// * `InvalidAmount` - zero or negative
/// * `PrecisionOverflow` - more than two decimal places (no silent truncation)
/// * `Overflow` - does not fit in `i64` cents
pub fn major_to_cents(amount: Decimal) -> Result<Cents, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = amount.normalize();
    if normalized.scale() > MINOR_UNIT_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: MINOR_UNIT_DECIMALS,
        });
    }

    let scaled = normalized
        .checked_mul(Decimal::from(10i64.pow(MINOR_UNIT_DECIMALS)))
        .ok_or(MoneyError::Overflow)?;
    scaled.to_i64().ok_or(MoneyError::Overflow)
}
