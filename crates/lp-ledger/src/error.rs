//! Ledger error and outcome types.
//!
//! Business outcomes (conflicts, insufficient funds, already-terminal orders)
//! are values, not failures of the store. [`LedgerError`] is reserved for the
//! store itself misbehaving, which callers treat as transient.

use lp_schemas::{InvalidOrderNumber, UserId};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("order {0} not found")]
    OrderNotFound(String),

    /// Store-level failure (connection lost, constraint surprise, ...).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Result of inserting an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A fresh NEW row was created.
    Uploaded,
    /// The number is already owned by the caller; nothing changed.
    AlreadyUploadedBySameUser,
    /// The number is owned by someone else; nothing changed.
    AlreadyUploadedByOtherUser,
}

/// Result of an atomic accrual credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Order moved to PROCESSED and the owner's balance was incremented.
    Credited,
    /// The order was already terminal; no row changed.
    AlreadyTerminal,
}

/// Result of registering a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created(UserId),
    LoginTaken,
}

/// Failures of the order intake façade.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid order format")]
    InvalidFormat,

    #[error("already uploaded by other user")]
    AlreadyUploadedByOtherUser,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<InvalidOrderNumber> for UploadError {
    fn from(_: InvalidOrderNumber) -> Self {
        UploadError::InvalidFormat
    }
}

/// Failures of a debit, either at the façade or inside the ledger transaction.
#[derive(Debug, thiserror::Error)]
pub enum WithdrawError {
    #[error("invalid order format")]
    InvalidFormat,

    #[error("withdrawal amount must be positive")]
    InvalidAmount,

    /// Balance would go negative. The transaction was rolled back.
    #[error("not enough funds")]
    InsufficientFunds,

    /// A withdrawal with this number already exists. The transaction was rolled back.
    #[error("withdrawal {0} already exists")]
    AlreadyWithdrawn(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<InvalidOrderNumber> for WithdrawError {
    fn from(_: InvalidOrderNumber) -> Self {
        WithdrawError::InvalidFormat
    }
}

impl From<anyhow::Error> for WithdrawError {
    fn from(e: anyhow::Error) -> Self {
        WithdrawError::Ledger(LedgerError::Backend(e))
    }
}
