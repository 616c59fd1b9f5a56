//! Axum router and all HTTP handlers for lp-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are thin: parse, call one service, map the
//! outcome to a status code.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use lp_ledger::UploadAccepted;

use crate::{
    api_types::{
        BalanceResponse, CredentialsRequest, HealthResponse, OrderResponse, TokenRequest,
        WithdrawRequest, WithdrawalResponse,
    },
    auth::AuthUser,
    error::ApiError,
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing) are **not** applied here; `main.rs` attaches
/// them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/user/register", post(register))
        .route("/api/user/login", post(login))
        .route("/api/user/token", post(token))
        .route("/api/user/orders", post(upload_order).get(list_orders))
        .route("/api/user/balance", get(balance))
        .route("/api/user/balance/withdraw", post(withdraw))
        .route("/api/user/withdrawals", get(list_withdrawals))
        .with_state(state)
}

/// JSON bodies are decoded regardless of `Content-Type`; any decode failure
/// is a 400.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "failed decoding body");
        ApiError::bad_request("failed decoding body")
    })
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /api/user/register  /api/user/login  /api/user/token
// ---------------------------------------------------------------------------

pub(crate) async fn register(
    State(st): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: CredentialsRequest = parse_json(&body)?;
    let creds = st.auth.register(&req.login, &req.password).await?;
    Ok((StatusCode::OK, Json(creds)).into_response())
}

pub(crate) async fn login(
    State(st): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: CredentialsRequest = parse_json(&body)?;
    let creds = st.auth.login(&req.login, &req.password).await?;
    Ok((StatusCode::OK, Json(creds)).into_response())
}

pub(crate) async fn token(
    State(st): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: TokenRequest = parse_json(&body)?;
    let creds = st.auth.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(creds)).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/user/orders  GET /api/user/orders
// ---------------------------------------------------------------------------

/// Body is the bare order number as `text/plain`.
pub(crate) async fn upload_order(
    State(st): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    body: String,
) -> Result<StatusCode, ApiError> {
    match st.intake.upload(user_id, &body).await? {
        UploadAccepted::New => Ok(StatusCode::ACCEPTED),
        UploadAccepted::AlreadyUploaded => Ok(StatusCode::OK),
    }
}

pub(crate) async fn list_orders(
    State(st): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let orders = st.intake.orders(user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<OrderResponse> = orders.iter().map(OrderResponse::from).collect();
    Ok((StatusCode::OK, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/user/balance  POST /api/user/balance/withdraw
// ---------------------------------------------------------------------------

pub(crate) async fn balance(
    State(st): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let b = st.desk.balance(user_id).await?;
    Ok(Json(b.into()))
}

pub(crate) async fn withdraw(
    State(st): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let req: WithdrawRequest = parse_json(&body)?;
    st.desk.withdraw(user_id, &req.order, req.sum).await?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// GET /api/user/withdrawals
// ---------------------------------------------------------------------------

pub(crate) async fn list_withdrawals(
    State(st): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let withdrawals = st.desk.withdrawals(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<WithdrawalResponse> =
        withdrawals.iter().map(WithdrawalResponse::from).collect();
    Ok((StatusCode::OK, Json(body)).into_response())
}
