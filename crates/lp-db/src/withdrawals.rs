use anyhow::Context;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use lp_ledger::{LedgerError, WithdrawError};
use lp_schemas::{Balance, OrderNumber, UserId, Withdrawal};

use crate::is_unique_violation;

/// Debit `amount` and record the withdrawal, in one transaction.
///
/// The user row is locked (`FOR UPDATE`) before the balance is read, so two
/// concurrent debits for the same user are serialised and the second one
/// sees the first one's result.
pub(crate) async fn withdraw(
    pool: &PgPool,
    user_id: UserId,
    number: &OrderNumber,
    amount: Decimal,
) -> Result<Withdrawal, WithdrawError> {
    if amount <= Decimal::ZERO {
        return Err(WithdrawError::InvalidAmount);
    }

    let mut tx = pool.begin().await.context("withdraw begin failed")?;

    let current: Option<(Decimal,)> =
        sqlx::query_as::<_, (Decimal,)>("select current from users where id = $1 for update")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .context("withdraw balance lock failed")?;
    let Some((current,)) = current else {
        return Err(LedgerError::UserNotFound(user_id).into());
    };

    let (taken,): (bool,) = sqlx::query_as::<_, (bool,)>(
        "select exists (select 1 from withdrawals where number = $1)",
    )
    .bind(number.as_str())
    .fetch_one(&mut *tx)
    .await
    .context("withdraw duplicate check failed")?;
    if taken {
        return Err(WithdrawError::AlreadyWithdrawn(number.to_string()));
    }

    if current - amount < Decimal::ZERO {
        return Err(WithdrawError::InsufficientFunds);
    }

    sqlx::query(
        r#"
        update users
           set current = current - $2,
               withdrawn = withdrawn + $2
         where id = $1
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut *tx)
    .await
    .context("withdraw balance update failed")?;

    let inserted = sqlx::query(
        r#"
        insert into withdrawals (number, user_id, sum, processed_at)
        values ($1, $2, $3, now())
        returning processed_at
        "#,
    )
    .bind(number.as_str())
    .bind(user_id)
    .bind(amount)
    .fetch_one(&mut *tx)
    .await;

    let row = match inserted {
        Ok(row) => row,
        // Lost a race with another user's withdrawal under the same number.
        Err(e) if is_unique_violation(&e, Some("withdrawals_pkey")) => {
            return Err(WithdrawError::AlreadyWithdrawn(number.to_string()));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context("withdraw insert failed")
                .into())
        }
    };

    tx.commit().await.context("withdraw commit failed")?;

    Ok(Withdrawal {
        order: number.as_str().to_string(),
        user_id,
        sum: amount,
        processed_at: row
            .try_get("processed_at")
            .context("decode withdrawals.processed_at")?,
    })
}

pub(crate) async fn withdrawals_for_user(
    pool: &PgPool,
    user_id: UserId,
) -> Result<Vec<Withdrawal>, LedgerError> {
    let rows = sqlx::query(
        r#"
        select number, user_id, sum, processed_at
        from withdrawals
        where user_id = $1
        order by processed_at desc, number desc
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("withdrawals_for_user query failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(Withdrawal {
            order: row.try_get("number").context("decode withdrawals.number")?,
            user_id: row.try_get("user_id").context("decode withdrawals.user_id")?,
            sum: row.try_get("sum").context("decode withdrawals.sum")?,
            processed_at: row
                .try_get("processed_at")
                .context("decode withdrawals.processed_at")?,
        });
    }
    Ok(out)
}

pub(crate) async fn balance(pool: &PgPool, user_id: UserId) -> Result<Balance, LedgerError> {
    let row: Option<(Decimal, Decimal)> = sqlx::query_as::<_, (Decimal, Decimal)>(
        "select current, withdrawn from users where id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("balance query failed")?;

    row.map(|(current, withdrawn)| Balance { current, withdrawn })
        .ok_or(LedgerError::UserNotFound(user_id))
}
