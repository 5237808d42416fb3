//! Bounded history of finished runs.

use std::collections::VecDeque;

use stepwise_types::workflow::WorkflowExecution;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Fixed-capacity ring buffer of finished executions.
///
/// Append-only; once full, each append evicts the oldest entry.
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    entries: RwLock<VecDeque<WorkflowExecution>>,
}

impl ExecutionHistory {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub async fn append(&self, execution: WorkflowExecution) {
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(execution);
    }

    /// Up to `limit` most recent runs, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<WorkflowExecution> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get(&self, run_id: &Uuid) -> Option<WorkflowExecution> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == *run_id)
            .cloned()
    }

    /// Runs of one template, newest first.
    pub async fn for_template(&self, template_id: &str) -> Vec<WorkflowExecution> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.template_id == template_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
