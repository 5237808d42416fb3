//! Template store over the `KvStore` contract.
//!
//! Each template is kept as a JSON value under `template:{id}` in its owner
//! namespace. The store is the sole writer of persisted template state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use stepwise_types::error::TemplateError;
use stepwise_types::workflow::{TemplateStats, WorkflowTemplate};
use tokio::sync::Mutex;

use crate::storage::KvStore;

const KEY_PREFIX: &str = "template:";

fn template_key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Persists templates per owner namespace.
///
/// Statistic updates are read-modify-write cycles; they run under a
/// per-`(owner, id)` async mutex so concurrent runs never lose an update.
pub struct TemplateStore<K: KvStore> {
    kv: Arc<K>,
    stat_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl<K: KvStore> TemplateStore<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self {
            kv,
            stat_locks: DashMap::new(),
        }
    }

    /// Write a template under `owner`, replacing any template with the same id.
    pub async fn put(&self, owner: &str, template: &WorkflowTemplate) -> Result<(), TemplateError> {
        let value = serde_json::to_value(template)
            .map_err(|e| TemplateError::Serialization(e.to_string()))?;
        self.kv
            .set(owner, &template_key(&template.id), &value)
            .await
            .map_err(|e| {
                tracing::error!(owner, template_id = %template.id, error = %e, "failed to store template");
                TemplateError::from(e)
            })
    }

    /// Read a template from exactly one namespace.
    pub async fn get(&self, owner: &str, id: &str) -> Result<Option<WorkflowTemplate>, TemplateError> {
        let value = self.kv.get(owner, &template_key(id)).await.map_err(|e| {
            tracing::error!(owner, template_id = id, error = %e, "failed to read template");
            TemplateError::from(e)
        })?;

        match value {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| TemplateError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// All templates in one namespace. Unreadable entries are skipped.
    pub async fn list(&self, owner: &str) -> Result<Vec<WorkflowTemplate>, TemplateError> {
        let keys = self.kv.list_keys(owner).await.map_err(|e| {
            tracing::error!(owner, error = %e, "failed to list templates");
            TemplateError::from(e)
        })?;

        let mut templates = Vec::new();
        for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
            let Some(value) = self.kv.get(owner, key).await.map_err(TemplateError::from)? else {
                continue;
            };
            match serde_json::from_value::<WorkflowTemplate>(value) {
                Ok(template) => templates.push(template),
                Err(e) => tracing::warn!(owner, key = %key, error = %e, "skipping unparseable template"),
            }
        }
        Ok(templates)
    }

    /// Remove a template and its stats lock. Returns `true` if it existed.
    pub async fn delete(&self, owner: &str, id: &str) -> Result<bool, TemplateError> {
        let removed = self
            .kv
            .delete(owner, &template_key(id))
            .await
            .map_err(TemplateError::from)?;
        self.stat_locks.remove(&(owner.to_string(), id.to_string()));
        Ok(removed)
    }

    /// Fold one run outcome into a template's statistics.
    ///
    /// Returns the updated statistics, or `None` when the namespace has no
    /// template with this id.
    pub async fn update_stats(
        &self,
        owner: &str,
        id: &str,
        success: bool,
        duration_secs: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<TemplateStats>, TemplateError> {
        let lock = self
            .stat_locks
            .entry((owner.to_string(), id.to_string()))
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let Some(mut template) = self.get(owner, id).await? else {
            return Ok(None);
        };
        template.stats.record(success, duration_secs, at);
        self.put(owner, &template).await?;

        tracing::debug!(
            owner,
            template_id = id,
            total = template.stats.total_executions,
            success_rate = template.stats.success_rate,
            "template stats updated"
        );
        Ok(Some(template.stats))
    }
}
