//! In-memory implementation of `KvStore`.

use dashmap::DashMap;
use serde_json::Value;
use stepwise_types::error::RepositoryError;

use super::kv_store::KvStore;

/// `KvStore` backed by a concurrent map.
///
/// Provides the same semantics as the SQLite store without durability.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: DashMap<(String, String), Value>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored values across all owners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for InMemoryKvStore {
    async fn get(&self, owner: &str, key: &str) -> Result<Option<Value>, RepositoryError> {
        Ok(self
            .entries
            .get(&(owner.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn set(&self, owner: &str, key: &str, value: &Value) -> Result<(), RepositoryError> {
        self.entries
            .insert((owner.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    async fn delete(&self, owner: &str, key: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .entries
            .remove(&(owner.to_string(), key.to_string()))
            .is_some())
    }

    async fn list_keys(&self, owner: &str) -> Result<Vec<String>, RepositoryError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == owner)
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
