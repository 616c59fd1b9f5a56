use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use lp_ledger::{LedgerError, RegisterOutcome};
use lp_schemas::{UserId, UserRecord};

use crate::is_unique_violation;

/// Insert the user and its first session together.
pub(crate) async fn register_user(
    pool: &PgPool,
    login: &str,
    password_hash: &str,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<RegisterOutcome, LedgerError> {
    let mut tx = pool.begin().await.context("register_user begin failed")?;

    let inserted = sqlx::query_as::<_, (i64,)>(
        "insert into users (login, password_hash) values ($1, $2) returning id",
    )
    .bind(login)
    .bind(password_hash)
    .fetch_one(&mut *tx)
    .await;

    let id = match inserted {
        Ok((id,)) => id,
        Err(e) if is_unique_violation(&e, Some("uq_users_login")) => {
            return Ok(RegisterOutcome::LoginTaken);
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context("register_user insert failed")
                .into())
        }
    };

    sqlx::query("insert into sessions (user_id, refresh_token, expires_at) values ($1, $2, $3)")
        .bind(id)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .context("register_user session insert failed")?;

    tx.commit().await.context("register_user commit failed")?;
    Ok(RegisterOutcome::Created(id))
}

pub(crate) async fn user_by_login(
    pool: &PgPool,
    login: &str,
) -> Result<Option<UserRecord>, LedgerError> {
    let row: Option<(i64, String, String)> = sqlx::query_as::<_, (i64, String, String)>(
        "select id, login, password_hash from users where login = $1",
    )
    .bind(login)
    .fetch_optional(pool)
    .await
    .context("user_by_login query failed")?;

    Ok(row.map(|(id, login, password_hash)| UserRecord {
        id,
        login,
        password_hash,
    }))
}

pub(crate) async fn create_session(
    pool: &PgPool,
    user_id: UserId,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), LedgerError> {
    sqlx::query("insert into sessions (user_id, refresh_token, expires_at) values ($1, $2, $3)")
        .bind(user_id)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(pool)
        .await
        .context("create_session failed")?;
    Ok(())
}

pub(crate) async fn purge_expired_sessions(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<u64, LedgerError> {
    let res = sqlx::query("delete from sessions where expires_at < $1")
        .bind(now)
        .execute(pool)
        .await
        .context("purge_expired_sessions failed")?;
    Ok(res.rows_affected())
}

pub(crate) async fn session_user(
    pool: &PgPool,
    refresh_token: &str,
) -> Result<Option<UserId>, LedgerError> {
    let row: Option<(i64,)> =
        sqlx::query_as::<_, (i64,)>("select user_id from sessions where refresh_token = $1")
            .bind(refresh_token)
            .fetch_optional(pool)
            .await
            .context("session_user query failed")?;
    Ok(row.map(|(id,)| id))
}

pub(crate) async fn rotate_session(
    pool: &PgPool,
    old_token: &str,
    new_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool, LedgerError> {
    let res = sqlx::query(
        r#"
        update sessions
           set refresh_token = $2, expires_at = $3
         where refresh_token = $1
        "#,
    )
    .bind(old_token)
    .bind(new_token)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("rotate_session failed")?;
    Ok(res.rows_affected() == 1)
}
