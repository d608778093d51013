//! Vault Core - access ledger domain
//!
//! This crate provides the core types and interfaces of the access vault:
//! - Access attempts and their constrained state machine
//! - Plan tiers and windowed quota arithmetic
//! - Billing provider events and their reconciliation records
//! - The error taxonomy shared by every layer
//!
//! Storage and services live in `vault-db`; the HTTP surface in `vault-api`.

pub mod constants;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod types;

pub use constants::*;
pub use error::*;
pub use types::*;
