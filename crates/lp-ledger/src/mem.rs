//! In-process ledger.
//!
//! Every operation takes the single state mutex for its whole duration, so
//! each call is atomic and debits for one user are serialised, which is the
//! same guarantee the Postgres ledger gets from its transactions and row
//! locks. No IO, no randomness.

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use lp_schemas::{
    Balance, Order, OrderNumber, OrderStatus, PendingOrder, UserId, UserRecord, Withdrawal,
};

use crate::{
    CreditOutcome, Ledger, LedgerError, RegisterOutcome, UploadOutcome, UserStore, WithdrawError,
};

const DEFAULT_CLAIM_LEASE_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct MemUser {
    record: UserRecord,
    balance: Balance,
}

#[derive(Debug, Clone)]
struct MemOrder {
    order: Order,
    claimed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemState {
    next_user_id: UserId,
    users: BTreeMap<UserId, MemUser>,
    logins: HashMap<String, UserId>,
    orders: HashMap<String, MemOrder>,
    withdrawals: HashMap<String, Withdrawal>,
    sessions: HashMap<String, (UserId, DateTime<Utc>)>,
    /// `(limit, offset)` of every `claim_pending_page` call, in call order.
    page_log: Vec<(usize, usize)>,
}

impl MemState {
    fn user_mut(&mut self, user_id: UserId) -> Result<&mut MemUser, LedgerError> {
        self.users
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound(user_id))
    }
}

/// In-memory [`Ledger`] + [`UserStore`].
pub struct MemLedger {
    state: Mutex<MemState>,
    claim_lease: Duration,
}

impl Default for MemLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLedger {
    pub fn new() -> Self {
        Self::with_claim_lease(Duration::seconds(DEFAULT_CLAIM_LEASE_SECS))
    }

    pub fn with_claim_lease(claim_lease: Duration) -> Self {
        Self {
            state: Mutex::new(MemState {
                next_user_id: 1,
                ..MemState::default()
            }),
            claim_lease,
        }
    }

    /// Register a user with a placeholder hash and no session. Test helper.
    pub async fn add_user(&self, login: &str) -> UserId {
        let mut st = self.state.lock().await;
        let id = st.next_user_id;
        st.next_user_id += 1;
        st.logins.insert(login.to_string(), id);
        st.users.insert(
            id,
            MemUser {
                record: UserRecord {
                    id,
                    login: login.to_string(),
                    password_hash: String::new(),
                },
                balance: Balance::default(),
            },
        );
        id
    }

    /// `(limit, offset)` of every page request seen so far.
    pub async fn page_log(&self) -> Vec<(usize, usize)> {
        self.state.lock().await.page_log.clone()
    }

    /// Current status of `number`, if uploaded.
    pub async fn order_status(&self, number: &str) -> Option<OrderStatus> {
        let st = self.state.lock().await;
        st.orders.get(number).map(|o| o.order.status)
    }

    /// Whether `number` currently holds a live claim lease.
    pub async fn is_claimed(&self, number: &str) -> bool {
        let st = self.state.lock().await;
        let now = Utc::now();
        st.orders
            .get(number)
            .and_then(|o| o.claimed_until)
            .map(|until| until > now)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Ledger for MemLedger {
    async fn upload_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
    ) -> Result<UploadOutcome, LedgerError> {
        let mut st = self.state.lock().await;
        if !st.users.contains_key(&user_id) {
            return Err(LedgerError::UserNotFound(user_id));
        }

        if let Some(existing) = st.orders.get(number.as_str()) {
            return Ok(if existing.order.user_id == user_id {
                UploadOutcome::AlreadyUploadedBySameUser
            } else {
                UploadOutcome::AlreadyUploadedByOtherUser
            });
        }

        st.orders.insert(
            number.as_str().to_string(),
            MemOrder {
                order: Order {
                    number: number.as_str().to_string(),
                    user_id,
                    status: OrderStatus::New,
                    accrual: None,
                    uploaded_at: Utc::now(),
                },
                claimed_until: None,
            },
        );
        Ok(UploadOutcome::Uploaded)
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        let st = self.state.lock().await;
        let mut out: Vec<Order> = st
            .orders
            .values()
            .filter(|o| o.order.user_id == user_id)
            .map(|o| o.order.clone())
            .collect();
        out.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.number.cmp(&a.number))
        });
        Ok(out)
    }

    async fn claim_pending_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PendingOrder>, LedgerError> {
        let mut st = self.state.lock().await;
        st.page_log.push((limit, offset));

        let now = Utc::now();
        let mut candidates: Vec<&MemOrder> = st
            .orders
            .values()
            .filter(|o| !o.order.status.is_terminal())
            .filter(|o| o.claimed_until.map(|until| until <= now).unwrap_or(true))
            .collect();
        candidates.sort_by(|a, b| {
            a.order
                .uploaded_at
                .cmp(&b.order.uploaded_at)
                .then_with(|| a.order.number.cmp(&b.order.number))
        });

        let page: Vec<PendingOrder> = candidates
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|o| PendingOrder {
                number: o.order.number.clone(),
                user_id: o.order.user_id,
                status: o.order.status,
                uploaded_at: o.order.uploaded_at,
            })
            .collect();

        let lease_until = now + self.claim_lease;
        for p in &page {
            if let Some(o) = st.orders.get_mut(&p.number) {
                o.claimed_until = Some(lease_until);
            }
        }

        Ok(page)
    }

    async fn release_claim(&self, number: &str) -> Result<(), LedgerError> {
        let mut st = self.state.lock().await;
        if let Some(o) = st.orders.get_mut(number) {
            o.claimed_until = None;
        }
        Ok(())
    }

    async fn set_order_status(
        &self,
        number: &str,
        status: OrderStatus,
    ) -> Result<bool, LedgerError> {
        if status == OrderStatus::Processed {
            return Err(LedgerError::Backend(anyhow!(
                "order {number}: PROCESSED is only reachable through credit_accrual"
            )));
        }

        let mut st = self.state.lock().await;
        let o = st
            .orders
            .get_mut(number)
            .ok_or_else(|| LedgerError::OrderNotFound(number.to_string()))?;
        if o.order.status.is_terminal() {
            return Ok(false);
        }
        o.order.status = status;
        o.claimed_until = None;
        Ok(true)
    }

    async fn credit_accrual(
        &self,
        number: &str,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<CreditOutcome, LedgerError> {
        let mut st = self.state.lock().await;

        let o = st
            .orders
            .get(number)
            .ok_or_else(|| LedgerError::OrderNotFound(number.to_string()))?;
        if o.order.status.is_terminal() {
            return Ok(CreditOutcome::AlreadyTerminal);
        }
        if o.order.user_id != user_id {
            return Err(LedgerError::OrderNotFound(number.to_string()));
        }

        // Balance first: if the owner is missing nothing has been written yet.
        let user = st.user_mut(user_id)?;
        user.balance.current = user
            .balance
            .current
            .checked_add(amount)
            .ok_or_else(|| anyhow!("user {user_id}: balance overflow crediting {amount}"))?;

        if let Some(o) = st.orders.get_mut(number) {
            o.order.status = OrderStatus::Processed;
            o.order.accrual = Some(amount);
            o.claimed_until = None;
        }
        Ok(CreditOutcome::Credited)
    }

    async fn withdraw(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<Withdrawal, WithdrawError> {
        if amount <= Decimal::ZERO {
            return Err(WithdrawError::InvalidAmount);
        }

        let mut st = self.state.lock().await;
        if st.withdrawals.contains_key(number.as_str()) {
            return Err(WithdrawError::AlreadyWithdrawn(number.to_string()));
        }

        let user = st.user_mut(user_id)?;
        let new_current = user.balance.current - amount;
        if new_current < Decimal::ZERO {
            return Err(WithdrawError::InsufficientFunds);
        }
        let new_withdrawn = user
            .balance
            .withdrawn
            .checked_add(amount)
            .ok_or_else(|| anyhow!("user {user_id}: withdrawn total overflow"))?;
        user.balance.current = new_current;
        user.balance.withdrawn = new_withdrawn;

        let w = Withdrawal {
            order: number.as_str().to_string(),
            user_id,
            sum: amount,
            processed_at: Utc::now(),
        };
        st.withdrawals.insert(w.order.clone(), w.clone());
        Ok(w)
    }

    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        let st = self.state.lock().await;
        let mut out: Vec<Withdrawal> = st
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.processed_at
                .cmp(&a.processed_at)
                .then_with(|| b.order.cmp(&a.order))
        });
        Ok(out)
    }

    async fn balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        let st = self.state.lock().await;
        st.users
            .get(&user_id)
            .map(|u| u.balance)
            .ok_or(LedgerError::UserNotFound(user_id))
    }
}

#[async_trait]
impl UserStore for MemLedger {
    async fn register_user(
        &self,
        login: &str,
        password_hash: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RegisterOutcome, LedgerError> {
        let mut st = self.state.lock().await;
        if st.logins.contains_key(login) {
            return Ok(RegisterOutcome::LoginTaken);
        }

        let id = st.next_user_id;
        st.next_user_id += 1;
        st.logins.insert(login.to_string(), id);
        st.users.insert(
            id,
            MemUser {
                record: UserRecord {
                    id,
                    login: login.to_string(),
                    password_hash: password_hash.to_string(),
                },
                balance: Balance::default(),
            },
        );
        st.sessions.insert(refresh_token.to_string(), (id, expires_at));
        Ok(RegisterOutcome::Created(id))
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<UserRecord>, LedgerError> {
        let st = self.state.lock().await;
        Ok(st
            .logins
            .get(login)
            .and_then(|id| st.users.get(id))
            .map(|u| u.record.clone()))
    }

    async fn create_session(
        &self,
        user_id: UserId,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut st = self.state.lock().await;
        if !st.users.contains_key(&user_id) {
            return Err(LedgerError::UserNotFound(user_id));
        }
        st.sessions.insert(refresh_token.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut st = self.state.lock().await;
        let before = st.sessions.len();
        st.sessions.retain(|_, (_, expires_at)| *expires_at >= now);
        Ok((before - st.sessions.len()) as u64)
    }

    async fn session_user(&self, refresh_token: &str) -> Result<Option<UserId>, LedgerError> {
        let st = self.state.lock().await;
        Ok(st.sessions.get(refresh_token).map(|(id, _)| *id))
    }

    async fn rotate_session(
        &self,
        old_token: &str,
        new_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut st = self.state.lock().await;
        let Some((user_id, _)) = st.sessions.remove(old_token) else {
            return Ok(false);
        };
        st.sessions.insert(new_token.to_string(), (user_id, expires_at));
        Ok(true)
    }
}
