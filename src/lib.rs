//! Back-office loan ledger with webhook-driven gateway reconciliation.
//!
//! The crate is organized in layers:
//! - [`domain`]: core types, ports (traits) and error definitions
//! - [`app`]: application services and the reconciliation engine
//! - [`infra`]: Postgres store, gateway clients and other adapters
//! - [`api`]: HTTP handlers, webhook verification and routing

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
