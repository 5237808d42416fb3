//! Template manager: CRUD with owner-to-shared fallback.
//!
//! Templates saved under the reserved `__shared__` owner are visible to every
//! owner without being copied. Lookups try the caller's namespace first.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use stepwise_types::error::TemplateError;
use stepwise_types::workflow::{
    ExecutionStatus, SHARED_OWNER, TemplateOrigin, TemplateStats, WorkflowExecution,
    WorkflowTemplate,
};

use super::store::TemplateStore;
use crate::storage::KvStore;

/// Check structural invariants of a template.
///
/// Requires a non-empty name and step list, unique step ids, and that every
/// `depends_on` entry names another step of the same template. Dependency
/// order is not checked here: a dependency declared after its dependent is
/// reported at run time.
pub fn validate_template(template: &WorkflowTemplate) -> Result<(), TemplateError> {
    if template.id.trim().is_empty() {
        return Err(TemplateError::Invalid("template id is empty".into()));
    }
    if template.name.trim().is_empty() {
        return Err(TemplateError::Invalid("template name is empty".into()));
    }
    if template.steps.is_empty() {
        return Err(TemplateError::Invalid(format!(
            "template '{}' has no steps",
            template.name
        )));
    }

    let mut seen = HashSet::new();
    for step in &template.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(TemplateError::Invalid(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    for step in &template.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(TemplateError::Invalid(format!(
                    "step '{}' depends on itself",
                    step.id
                )));
            }
            if !seen.contains(dep.as_str()) {
                return Err(TemplateError::Invalid(format!(
                    "step '{}' depends on unknown step '{dep}'",
                    step.id
                )));
            }
        }
    }
    Ok(())
}

/// CRUD over the template store.
pub struct TemplateManager<K: KvStore> {
    store: TemplateStore<K>,
}

impl<K: KvStore> TemplateManager<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self {
            store: TemplateStore::new(kv),
        }
    }

    /// Validate and persist under `template.owner`, overwriting by id.
    pub async fn save(&self, template: &WorkflowTemplate) -> Result<(), TemplateError> {
        validate_template(template)?;
        self.store.put(&template.owner, template).await?;
        tracing::info!(
            owner = %template.owner,
            template_id = %template.id,
            name = %template.name,
            "template saved"
        );
        Ok(())
    }

    /// Load from the owner namespace, then the shared namespace.
    pub async fn load(&self, id: &str, owner: &str) -> Result<WorkflowTemplate, TemplateError> {
        if let Some(template) = self.store.get(owner, id).await? {
            return Ok(template);
        }
        if owner != SHARED_OWNER {
            if let Some(template) = self.store.get(SHARED_OWNER, id).await? {
                return Ok(template);
            }
        }
        Err(TemplateError::NotFound(id.to_string()))
    }

    /// Owner templates merged with shared ones.
    ///
    /// An owner template shadows a shared template with the same id. Sorted by
    /// success rate, then total executions, both descending; ties keep name
    /// order.
    pub async fn list(&self, owner: &str) -> Result<Vec<WorkflowTemplate>, TemplateError> {
        let mut templates = self.store.list(owner).await?;
        if owner != SHARED_OWNER {
            let own_ids: HashSet<String> = templates.iter().map(|t| t.id.clone()).collect();
            templates.extend(
                self.store
                    .list(SHARED_OWNER)
                    .await?
                    .into_iter()
                    .filter(|t| !own_ids.contains(&t.id)),
            );
        }

        templates.sort_by(|a, b| {
            b.stats
                .success_rate
                .partial_cmp(&a.stats.success_rate)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.stats.total_executions.cmp(&a.stats.total_executions))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(templates)
    }

    /// Record a run outcome on whichever namespace holds the template.
    pub async fn update_stats(
        &self,
        id: &str,
        owner: &str,
        success: bool,
        duration_secs: f64,
    ) -> Result<TemplateStats, TemplateError> {
        let now = Utc::now();
        if let Some(stats) = self
            .store
            .update_stats(owner, id, success, duration_secs, now)
            .await?
        {
            return Ok(stats);
        }
        if owner != SHARED_OWNER {
            if let Some(stats) = self
                .store
                .update_stats(SHARED_OWNER, id, success, duration_secs, now)
                .await?
            {
                return Ok(stats);
            }
        }
        Err(TemplateError::NotFound(id.to_string()))
    }

    /// Delete from the owner namespace only. Returns `true` if it existed.
    pub async fn delete(&self, id: &str, owner: &str) -> Result<bool, TemplateError> {
        let removed = self.store.delete(owner, id).await?;
        if removed {
            tracing::info!(owner, template_id = id, "template deleted");
        }
        Ok(removed)
    }

    /// Parse a YAML template and save it under `owner` as an imported template.
    pub async fn import_yaml(&self, yaml: &str, owner: &str) -> Result<WorkflowTemplate, TemplateError> {
        let mut template: WorkflowTemplate = serde_yaml_ng::from_str(yaml)
            .map_err(|e| TemplateError::Serialization(format!("invalid template YAML: {e}")))?;
        template.owner = owner.to_string();
        template.origin = TemplateOrigin::Imported;
        template.stats = TemplateStats::default();
        self.save(&template).await?;
        Ok(template)
    }

    /// Render a template as YAML.
    pub fn export_yaml(&self, template: &WorkflowTemplate) -> Result<String, TemplateError> {
        serde_yaml_ng::to_string(template).map_err(|e| TemplateError::Serialization(e.to_string()))
    }

    /// Save the step sequence of a successful run as an auto-generated template.
    ///
    /// `draft` supplies the steps and metadata; its statistics are replaced by
    /// the single sample contributed by `execution`.
    pub async fn promote(
        &self,
        mut draft: WorkflowTemplate,
        execution: &WorkflowExecution,
    ) -> Result<WorkflowTemplate, TemplateError> {
        if execution.status != ExecutionStatus::Completed {
            return Err(TemplateError::Invalid(format!(
                "run {} is {}, only completed runs can be promoted",
                execution.id, execution.status
            )));
        }

        let duration_secs = execution.duration_ms.unwrap_or(0) as f64 / 1000.0;
        draft.origin = TemplateOrigin::AutoGenerated;
        draft.stats = TemplateStats::default();
        draft.stats.record(
            true,
            duration_secs,
            execution.completed_at.unwrap_or_else(Utc::now),
        );
        draft.updated_at = Utc::now();

        self.save(&draft).await?;
        tracing::info!(
            owner = %draft.owner,
            template_id = %draft.id,
            run_id = %execution.id,
            "run promoted to template"
        );
        Ok(draft)
    }
}
