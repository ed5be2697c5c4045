//! Shared domain types for the price oracle pipeline.
//!
//! Everything downstream crates exchange lives here: token identities,
//! per-source price observations, merged canonical prices, the cache
//! snapshot, durable history records and per-run outcome reporting.

pub mod common;
pub mod outcome;
pub mod prices;
pub mod tokens;

pub use common::*;
pub use outcome::*;
pub use prices::*;
pub use tokens::*;
