//! Core types used throughout the ledger
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - one balance row per user, immutable after assignment.
///
/// # Usage:
/// - Primary key for balance rows
/// - Lock key for per-account mutual exclusion (ordered by value)
pub type UserId = u64;

/// Transaction ID - assigned by the persistence collaborator on insert.
pub type TxId = u64;

/// Amount in minor currency units (cents).
///
/// Signed so that storage can express the `>= 0` invariant as a check
/// rather than relying on the type.
pub type Cents = i64;
