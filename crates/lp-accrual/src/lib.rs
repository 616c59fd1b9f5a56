//! lp-accrual
//!
//! Client for the external accrual authority:
//! `GET {base}/api/orders/{number}` -> `{order, status, accrual?}`.
//!
//! Transient failures (connect/timeout, 5xx, 429) are retried inside one
//! [`AccrualSource::query`] call with a constant backoff. A 429 waits for its
//! `Retry-After` when present, otherwise for the configured rate-limit delay.
//! Every wait is capped by `retry_max_wait`.

mod client;
mod error;

use async_trait::async_trait;
use rust_decimal::Decimal;

use lp_schemas::UpstreamStatus;

pub use client::{AccrualClient, AccrualConfig};
pub use error::AccrualError;

/// One decoded reply from the accrual authority.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualReply {
    pub order: String,
    pub status: UpstreamStatus,
    /// Present when `status` is PROCESSED.
    pub accrual: Option<Decimal>,
}

/// Source of accrual verdicts. The reconciler depends on this, not on HTTP.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    /// `Ok(None)`: the authority does not know the order yet (HTTP 204).
    async fn query(&self, number: &str) -> Result<Option<AccrualReply>, AccrualError>;
}
