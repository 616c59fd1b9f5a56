//! lp-ledger
//!
//! The ledger seam: every consistency-critical mutation of orders, balances
//! and withdrawals goes through [`Ledger`]. Implementations:
//!
//! - `lp_db::PgLedger`: Postgres, one transaction per operation.
//! - [`MemLedger`]: in-process, one mutex per operation. Used by tests and
//!   by the daemon's in-process router tests.
//!
//! Contract every implementation must honour:
//! - `credit_accrual` writes the order row and the balance row together or
//!   not at all, and only moves a non-terminal order.
//! - `withdraw` reads, checks and writes the balance under a lock that
//!   serialises concurrent debits for the same user; `current` never goes
//!   negative.
//! - `claim_pending_page` only returns non-terminal orders whose claim lease
//!   is free, and leases them so a second reconciler skips them.
//!
//! [`OrderIntake`] and [`WithdrawalDesk`] are the request-facing façades
//! (format validation, then one ledger call).

mod error;
mod mem;
mod services;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use lp_schemas::{
    Balance, Order, OrderNumber, OrderStatus, PendingOrder, UserId, UserRecord, Withdrawal,
};

pub use error::{
    CreditOutcome, LedgerError, RegisterOutcome, UploadError, UploadOutcome, WithdrawError,
};
pub use mem::MemLedger;
pub use services::{OrderIntake, UploadAccepted, WithdrawalDesk};

/// Orders, balances and withdrawals.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a NEW order. A duplicate number is resolved by re-reading the
    /// existing owner.
    async fn upload_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
    ) -> Result<UploadOutcome, LedgerError>;

    /// All orders of `user_id`, newest upload first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError>;

    /// One page of non-terminal, unclaimed orders ordered by upload time
    /// (oldest first), leased to the caller.
    async fn claim_pending_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PendingOrder>, LedgerError>;

    /// Drop the lease on `number` without changing its status.
    async fn release_claim(&self, number: &str) -> Result<(), LedgerError>;

    /// Copy-through status update for a non-terminal order. Clears the lease.
    ///
    /// Returns `false` when the order was already terminal (nothing changed).
    /// `PROCESSED` is refused: it is only reachable through
    /// [`Ledger::credit_accrual`].
    async fn set_order_status(
        &self,
        number: &str,
        status: OrderStatus,
    ) -> Result<bool, LedgerError>;

    /// Atomically mark `number` PROCESSED with `amount` and add `amount` to
    /// the owner's `current` balance.
    async fn credit_accrual(
        &self,
        number: &str,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<CreditOutcome, LedgerError>;

    /// Atomically debit `amount` from `user_id` and record the withdrawal.
    async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<Withdrawal, WithdrawError>;

    /// All withdrawals of `user_id`, newest first.
    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError>;

    async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError>;
}

/// Users and refresh-token sessions.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user and its first session in one transaction.
    async fn register_user(
        &self,
        login: &str,
        password_hash: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RegisterOutcome, LedgerError>;

    async fn user_by_login(&self, login: &str) -> Result<Option<UserRecord>, LedgerError>;

    async fn create_session(
        &self,
        user_id: UserId,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Delete sessions that expired before `now`. Returns the number removed.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, LedgerError>;

    async fn session_user(&self, refresh_token: &str) -> Result<Option<UserId>, LedgerError>;

    /// Replace `old_token` with `new_token`. Returns `false` if `old_token`
    /// is unknown.
    async fn rotate_session(
        &self,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;
}
