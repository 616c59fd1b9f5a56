//! Request-facing façades.
//!
//! Both validate the identifier format first (Luhn), then make exactly one
//! ledger call. They hold no state of their own.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use lp_schemas::{Balance, Order, OrderNumber, UserId, Withdrawal};

use crate::{Ledger, LedgerError, UploadError, UploadOutcome, WithdrawError};

/// Successful upload: either freshly created or already owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAccepted {
    New,
    AlreadyUploaded,
}

#[derive(Clone)]
pub struct OrderIntake {
    ledger: Arc<dyn Ledger>,
}

impl OrderIntake {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn upload(&self, user_id: UserId, raw: &str) -> Result<UploadAccepted, UploadError> {
        let number = OrderNumber::parse(raw)?;
        match self.ledger.upload_order(&number, user_id).await? {
            UploadOutcome::Uploaded => {
                info!(order = %number, user_id, "order uploaded");
                Ok(UploadAccepted::New)
            }
            UploadOutcome::AlreadyUploadedBySameUser => {
                debug!(order = %number, user_id, "order already uploaded by same user");
                Ok(UploadAccepted::AlreadyUploaded)
            }
            UploadOutcome::AlreadyUploadedByOtherUser => {
                Err(UploadError::AlreadyUploadedByOtherUser)
            }
        }
    }

    pub async fn orders(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        self.ledger.orders_for_user(user_id).await
    }
}

#[derive(Clone)]
pub struct WithdrawalDesk {
    ledger: Arc<dyn Ledger>,
}

impl WithdrawalDesk {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        raw: &str,
        amount: Decimal,
    ) -> Result<Withdrawal, WithdrawError> {
        let number = OrderNumber::parse(raw)?;
        if amount <= Decimal::ZERO {
            return Err(WithdrawError::InvalidAmount);
        }
        let w = self.ledger.withdraw(user_id, &number, amount).await?;
        info!(order = %number, user_id, sum = %amount, "withdrawal processed");
        Ok(w)
    }

    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        self.ledger.withdrawals_for_user(user_id).await
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        self.ledger.balance(user_id).await
    }
}
