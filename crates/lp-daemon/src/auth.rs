//! Credentials: bcrypt password hashes, HS256 access tokens, opaque refresh
//! tokens stored as sessions.
//!
//! Access tokens carry the user id in `sub` and are verified statelessly.
//! Refresh tokens are 46 random bytes, hex encoded, and are single use:
//! `refresh` swaps the presented token for a new one.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lp_ledger::{LedgerError, RegisterOutcome, UserStore};
use lp_schemas::UserId;

use crate::api_types::CredentialsResponse;
use crate::error::ApiError;
use crate::state::AppState;

const REFRESH_TOKEN_BYTES: usize = 46;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("login and password must not be empty")]
    Validation,

    #[error("login already taken")]
    LoginTaken,

    #[error("unauthorized")]
    Unauthorized,

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("token signing failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Token and hashing parameters.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"REDACTED")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, cfg: AuthConfig) -> Self {
        let secret = cfg.jwt_secret.as_bytes();
        Self {
            users,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: cfg.access_ttl,
            refresh_ttl: cfg.refresh_ttl,
            bcrypt_cost: cfg.bcrypt_cost,
        }
    }

    pub async fn register(
        &self,
        login: &str,
        password: &str,
    ) -> Result<CredentialsResponse, AuthError> {
        validate(login, password)?;

        let hash = hash_password(password.to_string(), self.bcrypt_cost).await?;
        let refresh_token = new_refresh_token();
        let expires_at = Utc::now() + self.refresh_ttl;

        match self
            .users
            .register_user(login, &hash, &refresh_token, expires_at)
            .await?
        {
            RegisterOutcome::Created(user_id) => {
                info!(user_id, login, "user registered");
                self.credentials(user_id, refresh_token)
            }
            RegisterOutcome::LoginTaken => Err(AuthError::LoginTaken),
        }
    }

    pub async fn login(
        &self,
        login: &str,
        password: &str,
    ) -> Result<CredentialsResponse, AuthError> {
        validate(login, password)?;

        let Some(user) = self.users.user_by_login(login).await? else {
            debug!(login, "login for unknown user");
            return Err(AuthError::Unauthorized);
        };
        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            debug!(user_id = user.id, "password mismatch");
            return Err(AuthError::Unauthorized);
        }

        let refresh_token = new_refresh_token();
        self.users
            .create_session(user.id, &refresh_token, Utc::now() + self.refresh_ttl)
            .await?;
        self.credentials(user.id, refresh_token)
    }

    /// Exchange a live refresh token for a new token pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<CredentialsResponse, AuthError> {
        let now = Utc::now();
        let purged = self.users.purge_expired_sessions(now).await?;
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }

        let Some(user_id) = self.users.session_user(refresh_token).await? else {
            return Err(AuthError::Unauthorized);
        };
        let next = new_refresh_token();
        if !self
            .users
            .rotate_session(refresh_token, &next, now + self.refresh_ttl)
            .await?
        {
            // Rotated concurrently by another request.
            return Err(AuthError::Unauthorized);
        }
        self.credentials(user_id, next)
    }

    pub fn issue_access_token(&self, user_id: UserId) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<UserId, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AuthError::Unauthorized)?;
        data.claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::Unauthorized)
    }

    fn credentials(
        &self,
        user_id: UserId,
        refresh_token: String,
    ) -> Result<CredentialsResponse, AuthError> {
        Ok(CredentialsResponse {
            access_token: self.issue_access_token(user_id)?,
            refresh_token,
        })
    }
}

fn validate(login: &str, password: &str) -> Result<(), AuthError> {
    if login.is_empty() || password.is_empty() {
        return Err(AuthError::Validation);
    }
    Ok(())
}

pub fn new_refresh_token() -> String {
    let mut buf = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

// bcrypt is CPU bound; keep it off the async workers.
async fn hash_password(password: String, cost: u32) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Ledger(LedgerError::Backend(e.into())))?
        .map_err(AuthError::from)
}

async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Ledger(LedgerError::Backend(e.into())))?;
    // A malformed stored hash is a failed login, not a server error.
    Ok(verified.unwrap_or(false))
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Caller identity from `Authorization: Bearer <access token>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        let user_id = state
            .auth
            .verify_access_token(token)
            .map_err(|_| ApiError::unauthorized("invalid access token"))?;
        Ok(AuthUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_ledger::MemLedger;

    fn service(secret: &str) -> AuthService {
        AuthService::new(
            Arc::new(MemLedger::new()),
            AuthConfig {
                jwt_secret: secret.to_string(),
                access_ttl: Duration::hours(1),
                refresh_ttl: Duration::hours(2),
                bcrypt_cost: 4,
            },
        )
    }

    #[test]
    fn refresh_tokens_are_hex_of_46_bytes() {
        let t = new_refresh_token();
        assert_eq!(t.len(), REFRESH_TOKEN_BYTES * 2);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t, new_refresh_token());
    }

    #[test]
    fn access_token_round_trips_user_id() {
        let s = service("secret-a");
        let token = s.issue_access_token(42).unwrap();
        assert_eq!(s.verify_access_token(&token).unwrap(), 42);
    }

    #[test]
    fn access_token_signed_with_other_secret_is_rejected() {
        let token = service("secret-a").issue_access_token(42).unwrap();
        assert!(matches!(
            service("secret-b").verify_access_token(&token),
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn refresh_token_is_single_use() {
        let s = service("secret");
        let first = s.register("alice", "pw").await.unwrap();

        let second = s.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(matches!(
            s.refresh(&first.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(s.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn login_checks_password() {
        let s = service("secret");
        s.register("bob", "right").await.unwrap();

        assert!(s.login("bob", "right").await.is_ok());
        assert!(matches!(s.login("bob", "wrong").await, Err(AuthError::Unauthorized)));
        assert!(matches!(s.login("nobody", "x").await, Err(AuthError::Unauthorized)));
        assert!(matches!(s.login("", "x").await, Err(AuthError::Validation)));
    }
}
