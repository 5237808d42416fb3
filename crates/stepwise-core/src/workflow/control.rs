//! Cooperative control of live runs.
//!
//! Each live run owns a `RunControl`: a cancellation token, a pause switch
//! and a status channel. The engine checks cancellation and pause between
//! steps; in-flight tool calls are never interrupted.

use std::sync::Arc;

use dashmap::DashMap;
use stepwise_types::workflow::ExecutionStatus;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle shared between a running flow and the callers controlling it.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
    status: Arc<watch::Sender<ExecutionStatus>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(watch::Sender::new(false)),
            status: Arc::new(watch::Sender::new(ExecutionStatus::Pending)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Block while paused. Returns `true` if the run was cancelled meanwhile.
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            if !*rx.borrow_and_update() {
                return false;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Publish the run's current status.
    pub fn set_status(&self, status: ExecutionStatus) {
        self.status.send_replace(status);
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    /// Watch status changes (e.g. to wait until a run is paused).
    pub fn subscribe_status(&self) -> watch::Receiver<ExecutionStatus> {
        self.status.subscribe()
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Live run controls keyed by run id.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<Uuid, RunControl>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and return its control handle.
    pub fn register(&self, run_id: Uuid) -> RunControl {
        let control = RunControl::new();
        self.runs.insert(run_id, control.clone());
        control
    }

    pub fn get(&self, run_id: &Uuid) -> Option<RunControl> {
        self.runs.get(run_id).map(|c| c.value().clone())
    }

    pub fn remove(&self, run_id: &Uuid) {
        self.runs.remove(run_id);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
