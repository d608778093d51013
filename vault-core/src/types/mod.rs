//! Core type definitions for the access ledger
//!
//! All types follow these naming conventions:
//! - snake_case for field names
//! - *_id suffix for identifiers
//! - *_at suffix for timestamps

mod attempt;
mod billing;
mod common;
mod error_codes;
mod quota;

pub use attempt::*;
pub use billing::*;
pub use common::*;
pub use error_codes::*;
pub use quota::*;
