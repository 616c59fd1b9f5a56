use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use lp_ledger::{CreditOutcome, LedgerError, UploadOutcome};
use lp_schemas::{Order, OrderNumber, OrderStatus, PendingOrder, UserId};

use crate::is_unique_violation;

pub(crate) async fn upload_order(
    pool: &PgPool,
    number: &OrderNumber,
    user_id: UserId,
) -> Result<UploadOutcome, LedgerError> {
    let res = sqlx::query(
        r#"
        insert into orders (number, user_id, status, uploaded_at)
        values ($1, $2, 'NEW', now())
        "#,
    )
    .bind(number.as_str())
    .bind(user_id)
    .execute(pool)
    .await;

    match res {
        Ok(_) => Ok(UploadOutcome::Uploaded),
        Err(e) if is_unique_violation(&e, Some("orders_pkey")) => {
            let (owner,): (i64,) =
                sqlx::query_as::<_, (i64,)>("select user_id from orders where number = $1")
                    .bind(number.as_str())
                    .fetch_one(pool)
                    .await
                    .context("upload_order owner lookup failed")?;
            Ok(if owner == user_id {
                UploadOutcome::AlreadyUploadedBySameUser
            } else {
                UploadOutcome::AlreadyUploadedByOtherUser
            })
        }
        Err(e) => Err(anyhow::Error::new(e).context("upload_order insert failed").into()),
    }
}

pub(crate) async fn orders_for_user(
    pool: &PgPool,
    user_id: UserId,
) -> Result<Vec<Order>, LedgerError> {
    let rows = sqlx::query(
        r#"
        select number, user_id, status, accrual, uploaded_at
        from orders
        where user_id = $1
        order by uploaded_at desc, number desc
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("orders_for_user query failed")?;

    rows.iter().map(order_from_row).collect()
}

/// Lease one page of non-terminal orders.
///
/// `FOR UPDATE SKIP LOCKED` keeps two concurrent claimers off the same rows;
/// the lease keeps later claimers off them until it expires or a write
/// clears it.
pub(crate) async fn claim_pending_page(
    pool: &PgPool,
    limit: usize,
    offset: usize,
    lease_secs: i64,
) -> Result<Vec<PendingOrder>, LedgerError> {
    let limit = i64::try_from(limit).context("page limit out of range")?;
    let offset = i64::try_from(offset).context("page offset out of range")?;

    let rows = sqlx::query(
        r#"
        with picked as (
            select number
            from orders
            where status in ('NEW', 'PROCESSING')
              and (claimed_until is null or claimed_until <= now())
            order by uploaded_at, number
            limit $1 offset $2
            for update skip locked
        )
        update orders o
           set claimed_until = now() + make_interval(secs => $3)
          from picked
         where o.number = picked.number
        returning o.number, o.user_id, o.status, o.uploaded_at
        "#,
    )
    .bind(limit)
    .bind(offset)
    .bind(lease_secs as f64)
    .fetch_all(pool)
    .await
    .context("claim_pending_page failed")?;

    let mut page = rows
        .iter()
        .map(pending_from_row)
        .collect::<Result<Vec<_>, LedgerError>>()?;

    // RETURNING does not preserve the CTE's order.
    page.sort_by(|a, b| {
        a.uploaded_at
            .cmp(&b.uploaded_at)
            .then_with(|| a.number.cmp(&b.number))
    });
    debug!(limit, offset, claimed = page.len(), "claimed pending page");
    Ok(page)
}

pub(crate) async fn release_claim(pool: &PgPool, number: &str) -> Result<(), LedgerError> {
    sqlx::query("update orders set claimed_until = null where number = $1")
        .bind(number)
        .execute(pool)
        .await
        .context("release_claim failed")?;
    Ok(())
}

pub(crate) async fn set_order_status(
    pool: &PgPool,
    number: &str,
    status: OrderStatus,
) -> Result<bool, LedgerError> {
    if status == OrderStatus::Processed {
        return Err(anyhow!(
            "order {number}: PROCESSED is only reachable through credit_accrual"
        )
        .into());
    }

    let res = sqlx::query(
        r#"
        update orders
           set status = $2, claimed_until = null
         where number = $1
           and status in ('NEW', 'PROCESSING')
        "#,
    )
    .bind(number)
    .bind(status.as_str())
    .execute(pool)
    .await
    .context("set_order_status update failed")?;

    if res.rows_affected() == 1 {
        return Ok(true);
    }

    let (exists,): (bool,) =
        sqlx::query_as::<_, (bool,)>("select exists (select 1 from orders where number = $1)")
            .bind(number)
            .fetch_one(pool)
            .await
            .context("set_order_status existence check failed")?;
    if exists {
        Ok(false)
    } else {
        Err(LedgerError::OrderNotFound(number.to_string()))
    }
}

/// Order -> PROCESSED and owner balance += amount, in one transaction.
pub(crate) async fn credit_accrual(
    pool: &PgPool,
    number: &str,
    user_id: UserId,
    amount: Decimal,
) -> Result<CreditOutcome, LedgerError> {
    let mut tx = pool.begin().await.context("credit_accrual begin failed")?;

    let row: Option<(i64, String)> = sqlx::query_as::<_, (i64, String)>(
        "select user_id, status from orders where number = $1 for update",
    )
    .bind(number)
    .fetch_optional(&mut *tx)
    .await
    .context("credit_accrual order lock failed")?;

    let Some((owner, status)) = row else {
        return Err(LedgerError::OrderNotFound(number.to_string()));
    };
    let status = OrderStatus::parse(&status).context("decode orders.status")?;
    if status.is_terminal() {
        return Ok(CreditOutcome::AlreadyTerminal);
    }
    if owner != user_id {
        return Err(LedgerError::OrderNotFound(number.to_string()));
    }

    sqlx::query(
        r#"
        update orders
           set status = 'PROCESSED', accrual = $2, claimed_until = null
         where number = $1
        "#,
    )
    .bind(number)
    .bind(amount)
    .execute(&mut *tx)
    .await
    .context("credit_accrual order update failed")?;

    let res = sqlx::query("update users set current = current + $2 where id = $1")
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .context("credit_accrual balance update failed")?;
    if res.rows_affected() != 1 {
        // dropping `tx` rolls back the order update
        return Err(LedgerError::UserNotFound(user_id));
    }

    tx.commit().await.context("credit_accrual commit failed")?;
    Ok(CreditOutcome::Credited)
}

fn order_from_row(row: &PgRow) -> Result<Order, LedgerError> {
    let status: String = row.try_get("status").context("decode orders.status")?;
    let accrual: Option<Decimal> = row.try_get("accrual").context("decode orders.accrual")?;
    let uploaded_at: DateTime<Utc> = row
        .try_get("uploaded_at")
        .context("decode orders.uploaded_at")?;
    Ok(Order {
        number: row.try_get("number").context("decode orders.number")?,
        user_id: row.try_get("user_id").context("decode orders.user_id")?,
        status: OrderStatus::parse(&status).context("decode orders.status")?,
        accrual,
        uploaded_at,
    })
}

fn pending_from_row(row: &PgRow) -> Result<PendingOrder, LedgerError> {
    let status: String = row.try_get("status").context("decode orders.status")?;
    Ok(PendingOrder {
        number: row.try_get("number").context("decode orders.number")?,
        user_id: row.try_get("user_id").context("decode orders.user_id")?,
        status: OrderStatus::parse(&status).context("decode orders.status")?,
        uploaded_at: row
            .try_get("uploaded_at")
            .context("decode orders.uploaded_at")?,
    })
}
