//! lp-db
//!
//! Postgres implementation of [`lp_ledger::Ledger`] and
//! [`lp_ledger::UserStore`]. Every mutating operation is one transaction;
//! every query failure is wrapped with `.context(..)` and surfaces as
//! [`LedgerError::Backend`](lp_ledger::LedgerError::Backend).

mod orders;
mod users;
mod withdrawals;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};

use lp_ledger::{
    CreditOutcome, Ledger, LedgerError, RegisterOutcome, UploadOutcome, UserStore, WithdrawError,
};
use lp_schemas::{
    Balance, Order, OrderNumber, OrderStatus, PendingOrder, UserId, UserRecord, Withdrawal,
};

/// Connection string used by the DB scenario tests.
pub const ENV_DB_URL: &str = "LP_DATABASE_URL";

const DEFAULT_CLAIM_LEASE_SECS: i64 = 30;

/// Connect to Postgres at `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Postgres unique_violation (23505), optionally on a specific constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: Option<&str>) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && constraint.map_or(true, |c| db_err.constraint() == Some(c))
        }
        _ => false,
    }
}

/// Postgres-backed ledger and user store.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    claim_lease_secs: i64,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self::with_claim_lease(pool, DEFAULT_CLAIM_LEASE_SECS)
    }

    pub fn with_claim_lease(pool: PgPool, claim_lease_secs: i64) -> Self {
        Self {
            pool,
            claim_lease_secs,
        }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn upload_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
    ) -> Result<UploadOutcome, LedgerError> {
        orders::upload_order(&self.pool, number, user_id).await
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        orders::orders_for_user(&self.pool, user_id).await
    }

    async fn claim_pending_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PendingOrder>, LedgerError> {
        orders::claim_pending_page(&self.pool, limit, offset, self.claim_lease_secs).await
    }

    async fn release_claim(&self, number: &str) -> Result<(), LedgerError> {
        orders::release_claim(&self.pool, number).await
    }

    async fn set_order_status(
        &self,
        number: &str,
        status: OrderStatus,
    ) -> Result<bool, LedgerError> {
        orders::set_order_status(&self.pool, number, status).await
    }

    async fn credit_accrual(
        &self,
        number: &str,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<CreditOutcome, LedgerError> {
        orders::credit_accrual(&self.pool, number, user_id, amount).await
    }

    async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<Withdrawal, WithdrawError> {
        withdrawals::withdraw(&self.pool, user_id, number, amount).await
    }

    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        withdrawals::withdrawals_for_user(&self.pool, user_id).await
    }

    async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        withdrawals::balance(&self.pool, user_id).await
    }
}

#[async_trait]
impl UserStore for PgLedger {
    async fn register_user(
        &self,
        login: &str,
        password_hash: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RegisterOutcome, LedgerError> {
        users::register_user(&self.pool, login, password_hash, refresh_token, expires_at).await
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<UserRecord>, LedgerError> {
        users::user_by_login(&self.pool, login).await
    }

    async fn create_session(
        &self,
        user_id: UserId,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        users::create_session(&self.pool, user_id, refresh_token, expires_at).await
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        users::purge_expired_sessions(&self.pool, now).await
    }

    async fn session_user(&self, refresh_token: &str) -> Result<Option<UserId>, LedgerError> {
        users::session_user(&self.pool, refresh_token).await
    }

    async fn rotate_session(
        &self,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        users::rotate_session(&self.pool, old_token, new_token, expires_at).await
    }
}
