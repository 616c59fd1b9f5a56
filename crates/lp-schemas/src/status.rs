//! Order lifecycle statuses.
//!
//! ```text
//!   NEW ──► PROCESSING ──► PROCESSED (terminal, credited)
//!    │          │
//!    └──────────┴───────► INVALID   (terminal, no credit)
//! ```
//!
//! The accrual authority reports its own vocabulary ([`UpstreamStatus`]);
//! [`UpstreamStatus::local`] maps it onto ours.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Status of an uploaded order as stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    /// Rejected by the accrual authority. **Terminal.**
    Invalid,
    /// Accrual credited to the owner's balance. **Terminal.**
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    /// Terminal orders are never polled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status vocabulary of the accrual authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpstreamStatus {
    /// Known upstream, not yet being computed.
    Registered,
    Processing,
    Invalid,
    /// Reward computed; the reply carries an accrual amount.
    Processed,
}

impl UpstreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamStatus::Registered => "REGISTERED",
            UpstreamStatus::Processing => "PROCESSING",
            UpstreamStatus::Invalid => "INVALID",
            UpstreamStatus::Processed => "PROCESSED",
        }
    }

    /// Terminal failure spellings (`REJECTED`, `FAILED`, `CANCELLED`) are
    /// read as INVALID. Anything else unknown is an error.
    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "REGISTERED" => Ok(UpstreamStatus::Registered),
            "PROCESSING" => Ok(UpstreamStatus::Processing),
            "INVALID" | "REJECTED" | "FAILED" | "CANCELLED" | "CANCELED" => {
                Ok(UpstreamStatus::Invalid)
            }
            "PROCESSED" => Ok(UpstreamStatus::Processed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    /// The ledger status this upstream status copies through to.
    pub fn local(&self) -> OrderStatus {
        match self {
            UpstreamStatus::Registered => OrderStatus::New,
            UpstreamStatus::Processing => OrderStatus::Processing,
            UpstreamStatus::Invalid => OrderStatus::Invalid,
            UpstreamStatus::Processed => OrderStatus::Processed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.local().is_terminal()
    }
}
