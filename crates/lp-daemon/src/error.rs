//! HTTP error mapping. Every handler failure becomes one [`ApiError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use lp_ledger::{LedgerError, UploadError, WithdrawError};

use crate::api_types::ErrorResponse;
use crate::auth::AuthError;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Logs `err` and hides it from the client.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::internal(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation => ApiError::bad_request(e.to_string()),
            AuthError::LoginTaken => ApiError::new(StatusCode::CONFLICT, e.to_string()),
            AuthError::Unauthorized => ApiError::unauthorized(e.to_string()),
            AuthError::Hash(_) | AuthError::Token(_) | AuthError::Ledger(_) => {
                ApiError::internal(e)
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::InvalidFormat => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            UploadError::AlreadyUploadedByOtherUser => {
                ApiError::new(StatusCode::CONFLICT, e.to_string())
            }
            UploadError::Ledger(inner) => inner.into(),
        }
    }
}

impl From<WithdrawError> for ApiError {
    fn from(e: WithdrawError) -> Self {
        match e {
            WithdrawError::InvalidFormat | WithdrawError::InvalidAmount => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            WithdrawError::InsufficientFunds => {
                ApiError::new(StatusCode::PAYMENT_REQUIRED, e.to_string())
            }
            WithdrawError::AlreadyWithdrawn(_) => {
                ApiError::new(StatusCode::CONFLICT, e.to_string())
            }
            WithdrawError::Ledger(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_outcomes_map_to_client_errors() {
        assert_eq!(
            ApiError::from(UploadError::InvalidFormat).status,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(UploadError::AlreadyUploadedByOtherUser).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(WithdrawError::InsufficientFunds).status,
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::from(WithdrawError::AlreadyWithdrawn("2377225624".into())).status,
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::from(AuthError::LoginTaken).status, StatusCode::CONFLICT);
    }

    #[test]
    fn store_failures_hide_details() {
        let e = ApiError::from(LedgerError::Backend(anyhow::anyhow!("pool timed out")));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "internal error");
    }
}
