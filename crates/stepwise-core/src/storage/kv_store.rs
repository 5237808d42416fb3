//! Key-value store trait.
//!
//! Defines the interface for owner-namespaced key-value storage.
//! Implementations live in stepwise-infra (SQLite) and `storage::memory`.

use stepwise_types::error::RepositoryError;

/// Trait for owner-scoped key-value persistent storage.
///
/// Stores arbitrary JSON values keyed by owner namespace and string key.
/// The reserved owner `__shared__` holds values visible to every owner;
/// implementations treat it like any other namespace.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        owner: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        owner: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a key. Returns whether a value was removed.
    fn delete(
        &self,
        owner: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List all keys for an owner, sorted ascending.
    fn list_keys(
        &self,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
