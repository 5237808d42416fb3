//! Storage ports.
//!
//! `KvStore` is the persistence contract the template store is built on.
//! The durable SQLite implementation lives in stepwise-infra; `memory`
//! provides an in-process one for tests and embedded use.

pub mod kv_store;
pub mod memory;

pub use kv_store::KvStore;
pub use memory::InMemoryKvStore;
