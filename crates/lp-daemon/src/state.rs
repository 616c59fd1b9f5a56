//! Shared runtime state for lp-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything here is a
//! cheap handle over the ledger; this module owns nothing async itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lp_ledger::{Ledger, OrderIntake, UserStore, WithdrawalDesk};

use crate::auth::{AuthConfig, AuthService};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "lp-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub auth: AuthService,
    pub intake: OrderIntake,
    pub desk: WithdrawalDesk,
}

impl AppState {
    /// Wire the request-facing services over one store. Production passes a
    /// `PgLedger`, tests a `MemLedger`.
    pub fn new<S>(store: Arc<S>, auth: AuthConfig) -> Self
    where
        S: Ledger + UserStore + 'static,
    {
        let ledger: Arc<dyn Ledger> = store.clone();
        let users: Arc<dyn UserStore> = store;
        Self {
            build: BuildInfo::default(),
            auth: AuthService::new(users, auth),
            intake: OrderIntake::new(Arc::clone(&ledger)),
            desk: WithdrawalDesk::new(ledger),
        }
    }
}
