//! lp-schemas
//!
//! Shared domain types for the loyalty ledger: order identifiers, statuses,
//! and the row shapes the ledger hands back to callers. No IO.
//!
//! Money is `rust_decimal::Decimal` everywhere in this workspace. Conversion
//! to floating point happens only in the HTTP response types.

mod order_number;
mod status;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use order_number::{luhn_valid, InvalidOrderNumber, OrderNumber};
pub use status::{OrderStatus, UnknownStatus, UpstreamStatus};

pub type UserId = i64;

/// An uploaded order as the owner sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub user_id: UserId,
    pub status: OrderStatus,
    /// Absent until the order is PROCESSED.
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

/// A non-terminal order handed to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub number: String,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// A completed debit against a user's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    pub user_id: UserId,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// A user's spendable and lifetime-withdrawn totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// Stored credentials for one user.
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub login: String,
    pub password_hash: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("password_hash", &"<REDACTED>")
            .finish()
    }
}
