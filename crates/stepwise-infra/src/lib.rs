//! Infrastructure layer for Stepwise.
//!
//! Contains implementations of the storage traits defined in `stepwise-core`
//! (SQLite key-value store with split read/write pools) and the engine
//! configuration loader.

pub mod config;
pub mod sqlite;
