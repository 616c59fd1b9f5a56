//! lp-daemon library target.
//!
//! Exposes the router, auth and state so integration tests can drive the
//! HTTP surface in-process.

pub mod api_types;
pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
