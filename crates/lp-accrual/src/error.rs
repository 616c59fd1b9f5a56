use std::time::Duration;

use reqwest::StatusCode;

/// Every way an accrual query can fail. None of them is fatal to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// Connect failure, timeout, or other transport-level problem.
    #[error("accrual request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status other than 204 and 429.
    #[error("accrual authority returned {0}")]
    Status(StatusCode),

    #[error("accrual authority rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Body did not parse, or carried an unknown status or the wrong order.
    #[error("malformed accrual reply: {0}")]
    Decode(String),

    #[error("accrual client misconfigured: {0}")]
    Config(String),
}

impl AccrualError {
    /// Whether another attempt inside the same query may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AccrualError::Transport(e) => e.is_timeout() || e.is_connect(),
            AccrualError::Status(s) => s.is_server_error(),
            AccrualError::RateLimited { .. } => true,
            AccrualError::Decode(_) | AccrualError::Config(_) => false,
        }
    }
}
