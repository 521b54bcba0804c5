//! # Credential Cache Library
//!
//! Caches short-lived credentials (access tokens, tickets) issued by a
//! remote authority, re-using a cached value until it nears expiry and
//! collapsing concurrent refreshes of one credential into a single call.
//!
//! Modules:
//! - `cache`: expiring credential cache with single-flight refresh
//! - `parser`: recognition of refresh operation payloads
//! - `config`: YAML cache settings
//! - `helpers`: clocks and expiry arithmetic
//! - `observability`: prometheus refresh metrics
//! - `resilience`: caller-side retry
//! - `utils`: logging setup

pub mod cache;
pub mod config;
pub mod helpers;
pub mod observability;
pub mod parser;
pub mod resilience;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::cache::credential::{AccessToken, CredentialCache, RefreshOperation, Ticket};
pub use crate::cache::error::CacheError;
pub use crate::cache::kind::{AccessTokenKind, CredentialKind, TicketKind};
pub use crate::config::types::CacheConfig;
pub use crate::parser::refresh_result::RefreshResult;
