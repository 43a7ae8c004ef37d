//! Data layer module
//!
//! Handles all data persistence. Every piece of state the engine relies on
//! between requests (accounts, filters, circuit breaker rows, snapshots)
//! lives here; nothing is cached in process.

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
