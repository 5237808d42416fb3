//! Workflow engine: sequential, dependency-checked step execution with
//! remedy-driven retries.
//!
//! # Execution flow
//!
//! 1. Load the template (owner namespace, then shared) and `prepare` a
//!    pending run, registering its `RunControl`.
//! 2. For each step in declared order: honour pause and cancellation, check
//!    dependencies, evaluate the optional condition, resolve parameters
//!    (substitution, then placeholders) and call the tool under a timeout.
//! 3. A failed attempt goes through the remedy reasoner until the attempt
//!    ceiling is reached; the step's final failure halts the run.
//! 4. On success, compile the run output from step results.
//! 5. On any terminal state, update template statistics (completed/failed
//!    only) and append the run to history.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use stepwise_types::config::EngineConfig;
use stepwise_types::error::{StatusTransitionError, TemplateError};
use stepwise_types::tool::ToolContext;
use stepwise_types::workflow::{
    ExecutionFailure, ExecutionStatus, FailureKind, StepKind, StepStatus, WorkflowExecution,
    WorkflowStep, WorkflowTemplate,
};
use tokio::sync::watch;
use uuid::Uuid;

use super::condition::{condition_context, evaluate_condition};
use super::control::{RunControl, RunRegistry};
use super::history::ExecutionHistory;
use super::remedy::{RemedyOracle, RemedyReasoner};
use super::resolver::{PlaceholderResolver, WRAPPER_KEYS};
use super::substitution::{Scope, substitute};
use super::summary::{BudgetSummarizer, ResultSummarizer};
use crate::storage::KvStore;
use crate::template::{TemplateManager, validate_template};
use crate::tool::{ToolError, ToolRegistry};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors returned by engine calls. Step failures are not errors: they are
/// recorded on the returned run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("template storage error: {0}")]
    Template(TemplateError),

    #[error(transparent)]
    IllegalTransition(#[from] StatusTransitionError),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run {run_id} is {status}, only failed runs can be resumed")]
    NotResumable { run_id: Uuid, status: ExecutionStatus },
}

impl EngineError {
    /// Failure classification, where one applies.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            EngineError::TemplateNotFound(_) => Some(FailureKind::TemplateNotFound),
            _ => None,
        }
    }
}

impl From<TemplateError> for EngineError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(id) => EngineError::TemplateNotFound(id),
            TemplateError::Invalid(msg) => EngineError::InvalidTemplate(msg),
            other => EngineError::Template(other),
        }
    }
}

/// How one step ended.
enum StepOutcome {
    Completed,
    Skipped,
    Failed(ExecutionFailure),
    /// Cancellation observed between retry attempts.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives workflow runs.
///
/// Generic over storage, tool registry and oracle so callers (and tests)
/// choose the implementations. Share one engine across concurrent runs via
/// `Arc<Engine<..>>`; per-run state lives in each run's future.
pub struct Engine<K: KvStore, T: ToolRegistry, O: RemedyOracle> {
    manager: Arc<TemplateManager<K>>,
    tools: T,
    reasoner: RemedyReasoner<O>,
    resolver: PlaceholderResolver,
    config: EngineConfig,
    runs: RunRegistry,
    history: ExecutionHistory,
}

impl<K: KvStore, T: ToolRegistry, O: RemedyOracle> Engine<K, T, O> {
    pub fn new(manager: Arc<TemplateManager<K>>, tools: T, oracle: O, config: EngineConfig) -> Self {
        let summarizer = BudgetSummarizer::new(
            config.summary_byte_budget,
            config.summary_priority_fields.clone(),
        );
        let reasoner = RemedyReasoner::new(
            oracle,
            Box::new(summarizer),
            config.confidence_threshold,
            Duration::from_secs(config.oracle_timeout_secs),
        );
        Self {
            manager,
            tools,
            reasoner,
            resolver: PlaceholderResolver::new(config.strict_disambiguation),
            history: ExecutionHistory::new(config.history_capacity),
            runs: RunRegistry::new(),
            config,
        }
    }

    /// Replace the prior-result summarizer used in remedy requests.
    pub fn with_summarizer(mut self, summarizer: Box<dyn ResultSummarizer>) -> Self {
        self.reasoner = self.reasoner.with_summarizer(summarizer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &TemplateManager<K> {
        &self.manager
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Load a template and run it to a terminal state.
    pub async fn execute(
        &self,
        template_id: &str,
        owner: &str,
        input: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        let template = self.manager.load(template_id, owner).await?;
        let execution = self.prepare(&template, owner, input)?;
        self.run(&template, execution).await
    }

    /// Create a pending run and register its control handle.
    ///
    /// The run can be cancelled or paused by id from this point on. Callers
    /// that prepare a run are expected to `run` it.
    pub fn prepare(
        &self,
        template: &WorkflowTemplate,
        owner: &str,
        input: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        validate_template(template)?;
        let execution = WorkflowExecution::new(template, owner, input);
        self.runs.register(execution.id);
        tracing::debug!(
            run_id = %execution.id,
            template_id = %template.id,
            owner,
            "run prepared"
        );
        Ok(execution)
    }

    /// Drive a pending run to a terminal state.
    pub async fn run(
        &self,
        template: &WorkflowTemplate,
        execution: WorkflowExecution,
    ) -> Result<WorkflowExecution, EngineError> {
        self.drive(template, execution, true).await
    }

    /// Run a template without touching its statistics.
    ///
    /// Used for previews; the run still lands in history.
    pub async fn dry_run(
        &self,
        template: &WorkflowTemplate,
        owner: &str,
        input: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        let execution = self.prepare(template, owner, input)?;
        self.drive(template, execution, false).await
    }

    /// Re-run a failed run from its failing step.
    ///
    /// Creates a new run that copies completed and skipped steps of `failed`
    /// and starts at the first step that did not finish.
    pub async fn resume_from(
        &self,
        failed: &WorkflowExecution,
    ) -> Result<WorkflowExecution, EngineError> {
        if failed.status != ExecutionStatus::Failed {
            return Err(EngineError::NotResumable {
                run_id: failed.id,
                status: failed.status,
            });
        }

        let template = self.manager.load(&failed.template_id, &failed.owner).await?;
        let mut execution = self.prepare(&template, &failed.owner, failed.input.clone())?;
        execution.resumed_from = Some(failed.id);

        for step in execution.steps.iter_mut() {
            if let Some(previous) = failed.step(&step.step_id) {
                if previous.status.satisfies_dependency() {
                    *step = previous.clone();
                }
            }
        }
        execution.current_step_index = execution
            .steps
            .iter()
            .position(|s| !s.status.satisfies_dependency())
            .unwrap_or(execution.steps.len());

        tracing::info!(
            run_id = %execution.id,
            resumed_from = %failed.id,
            start_index = execution.current_step_index,
            "resuming failed run"
        );
        self.run(&template, execution).await
    }

    /// Run an unsaved step sequence.
    ///
    /// Statistics are not recorded. With `auto_promote` enabled, a completed
    /// run is saved as an auto-generated template.
    pub async fn execute_adhoc(
        &self,
        owner: &str,
        name: &str,
        steps: Vec<WorkflowStep>,
        input: Value,
    ) -> Result<WorkflowExecution, EngineError> {
        let draft = WorkflowTemplate::new(name, owner, steps);
        let execution = self.prepare(&draft, owner, input)?;
        let execution = self.drive(&draft, execution, false).await?;

        if execution.status == ExecutionStatus::Completed && self.config.auto_promote {
            if let Err(e) = self.manager.promote(draft, &execution).await {
                tracing::warn!(run_id = %execution.id, error = %e, "failed to promote ad-hoc run");
            }
        }
        Ok(execution)
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    /// Request cancellation. Takes effect before the next step starts.
    pub fn cancel(&self, run_id: &Uuid) -> Result<(), EngineError> {
        let control = self.runs.get(run_id).ok_or(EngineError::RunNotFound(*run_id))?;
        control.cancel();
        tracing::info!(run_id = %run_id, "run cancellation requested");
        Ok(())
    }

    /// Request a pause. Takes effect before the next step starts.
    pub fn pause(&self, run_id: &Uuid) -> Result<(), EngineError> {
        let control = self.runs.get(run_id).ok_or(EngineError::RunNotFound(*run_id))?;
        control.pause();
        tracing::info!(run_id = %run_id, "run pause requested");
        Ok(())
    }

    pub fn resume(&self, run_id: &Uuid) -> Result<(), EngineError> {
        let control = self.runs.get(run_id).ok_or(EngineError::RunNotFound(*run_id))?;
        control.resume();
        tracing::info!(run_id = %run_id, "run resume requested");
        Ok(())
    }

    /// Status of a live run.
    pub fn status(&self, run_id: &Uuid) -> Option<ExecutionStatus> {
        self.runs.get(run_id).map(|c| c.status())
    }

    /// Watch status changes of a live run.
    pub fn subscribe_status(&self, run_id: &Uuid) -> Option<watch::Receiver<ExecutionStatus>> {
        self.runs.get(run_id).map(|c| c.subscribe_status())
    }

    /// Number of registered (prepared or running) runs.
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        template: &WorkflowTemplate,
        mut execution: WorkflowExecution,
        record_stats: bool,
    ) -> Result<WorkflowExecution, EngineError> {
        let run_id = execution.id;
        if let Err(e) = check_runnable(template, &execution) {
            self.runs.remove(&run_id);
            return Err(e);
        }

        let control = self
            .runs
            .get(&run_id)
            .unwrap_or_else(|| self.runs.register(run_id));

        let result = self.step_loop(template, &mut execution, &control).await;
        self.runs.remove(&run_id);
        control.set_status(execution.status);
        result?;

        tracing::info!(
            run_id = %run_id,
            template_id = %template.id,
            status = %execution.status,
            duration_ms = execution.duration_ms.unwrap_or(0),
            "run finished"
        );

        if record_stats
            && matches!(
                execution.status,
                ExecutionStatus::Completed | ExecutionStatus::Failed
            )
        {
            let success = execution.status == ExecutionStatus::Completed;
            let duration_secs = execution.duration_ms.unwrap_or(0) as f64 / 1000.0;
            if let Err(e) = self
                .manager
                .update_stats(&template.id, &execution.owner, success, duration_secs)
                .await
            {
                tracing::warn!(
                    run_id = %run_id,
                    template_id = %template.id,
                    error = %e,
                    "failed to update template stats"
                );
            }
        }

        self.history.append(execution.clone()).await;
        Ok(execution)
    }

    fn transition(
        execution: &mut WorkflowExecution,
        control: &RunControl,
        next: ExecutionStatus,
    ) -> Result<(), EngineError> {
        execution.transition(next)?;
        control.set_status(next);
        Ok(())
    }

    async fn step_loop(
        &self,
        template: &WorkflowTemplate,
        execution: &mut WorkflowExecution,
        control: &RunControl,
    ) -> Result<(), EngineError> {
        if control.is_cancelled() {
            tracing::info!(run_id = %execution.id, "run cancelled before start");
            return Self::transition(execution, control, ExecutionStatus::Cancelled);
        }
        Self::transition(execution, control, ExecutionStatus::Running)?;
        tracing::info!(
            run_id = %execution.id,
            template_id = %template.id,
            owner = %execution.owner,
            steps = template.steps.len(),
            "run started"
        );

        for index in execution.current_step_index..template.steps.len() {
            execution.current_step_index = index;
            if execution
                .steps
                .get(index)
                .is_some_and(|s| s.status.satisfies_dependency())
            {
                continue;
            }

            if control.is_paused() && !control.is_cancelled() {
                Self::transition(execution, control, ExecutionStatus::Paused)?;
                tracing::info!(run_id = %execution.id, step_index = index, "run paused");
                let cancelled = control.wait_while_paused().await;
                if cancelled {
                    tracing::info!(run_id = %execution.id, "run cancelled while paused");
                    return Self::transition(execution, control, ExecutionStatus::Cancelled);
                }
                Self::transition(execution, control, ExecutionStatus::Running)?;
                tracing::info!(run_id = %execution.id, "run resumed");
            }

            if control.is_cancelled() {
                tracing::info!(
                    run_id = %execution.id,
                    next_step = %template.steps[index].id,
                    "run cancelled"
                );
                return Self::transition(execution, control, ExecutionStatus::Cancelled);
            }

            match self.execute_step(template, execution, index, control).await {
                StepOutcome::Completed | StepOutcome::Skipped => {}
                StepOutcome::Failed(failure) => {
                    tracing::warn!(
                        run_id = %execution.id,
                        step_id = failure.step_id.as_deref().unwrap_or(""),
                        kind = %failure.kind,
                        error = %failure.message,
                        "run failed"
                    );
                    execution.error = Some(failure);
                    return Self::transition(execution, control, ExecutionStatus::Failed);
                }
                StepOutcome::Cancelled => {
                    return Self::transition(execution, control, ExecutionStatus::Cancelled);
                }
            }
        }

        execution.current_step_index = template.steps.len();
        execution.output = Some(compile_output(template, execution));
        Self::transition(execution, control, ExecutionStatus::Completed)
    }

    // -----------------------------------------------------------------------
    // Single step
    // -----------------------------------------------------------------------

    async fn execute_step(
        &self,
        template: &WorkflowTemplate,
        execution: &mut WorkflowExecution,
        index: usize,
        control: &RunControl,
    ) -> StepOutcome {
        let step = &template.steps[index];
        let run_id = execution.id;

        for dep in &step.depends_on {
            let dep_status = execution.step(dep).map(|s| s.status);
            if !dep_status.is_some_and(StepStatus::satisfies_dependency) {
                let status = dep_status.map_or_else(|| "missing".to_string(), |s| format!("{s:?}").to_lowercase());
                return fail_step(
                    execution,
                    index,
                    FailureKind::DependencyUnmet,
                    format!("dependency '{dep}' of step '{}' has not completed (status: {status})", step.id),
                );
            }
        }

        if step.kind == StepKind::Parallel {
            return fail_step(
                execution,
                index,
                FailureKind::StepExecutionError,
                format!("step '{}' uses the parallel kind, which is not executable", step.id),
            );
        }

        if let Some(expression) = &step.condition {
            let context = condition_context(execution, index);
            match evaluate_condition(expression, &context) {
                Ok(true) => {}
                Ok(false) => {
                    let record = &mut execution.steps[index];
                    record.status = StepStatus::Skipped;
                    record.completed_at = Some(Utc::now());
                    tracing::info!(run_id = %run_id, step_id = %step.id, "step skipped by condition");
                    return StepOutcome::Skipped;
                }
                Err(e) => {
                    return fail_step(execution, index, FailureKind::StepExecutionError, e.to_string());
                }
            }
        }

        let mut input = match self.resolve_input(template, execution, index) {
            Ok(input) => input,
            Err(message) => {
                return fail_step(execution, index, FailureKind::StepExecutionError, message);
            }
        };

        {
            let record = &mut execution.steps[index];
            record.status = StepStatus::Running;
            record.started_at = Some(Utc::now());
            record.resolved_input = Some(Value::Object(input.clone()));
        }

        let max_attempts = step
            .max_attempts
            .unwrap_or(self.config.max_attempts)
            .clamp(1, self.config.max_attempts.max(1));
        let timeout_secs = step.timeout_secs.unwrap_or(self.config.step_timeout_secs);
        let input_schema = self.tools.input_schema(&step.capability).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            {
                let record = &mut execution.steps[index];
                record.attempt_count = attempt;
                record.resolved_input = Some(Value::Object(input.clone()));
            }

            tracing::debug!(
                run_id = %run_id,
                step_id = %step.id,
                capability = %step.capability,
                attempt,
                "invoking tool"
            );
            let context = ToolContext {
                owner: execution.owner.clone(),
                correlation_id: format!("{run_id}:{}:{attempt}", step.id),
            };
            let call = self.tools.execute(&step.capability, input.clone(), context);
            let (kind, message) = match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
                Ok(Ok(response)) if response.success => {
                    let record = &mut execution.steps[index];
                    record.status = StepStatus::Completed;
                    record.completed_at = Some(Utc::now());
                    record.result = Some(response.data.unwrap_or(Value::Null));
                    record.error = None;
                    record.error_kind = None;
                    tracing::info!(
                        run_id = %run_id,
                        step_id = %step.id,
                        attempt,
                        "step completed"
                    );
                    return StepOutcome::Completed;
                }
                Ok(Ok(response)) => (
                    FailureKind::StepExecutionError,
                    response
                        .error
                        .unwrap_or_else(|| "tool reported failure without an error message".to_string()),
                ),
                Ok(Err(ToolError::NotFound(capability))) => {
                    return fail_step(
                        execution,
                        index,
                        FailureKind::ToolNotFound,
                        format!("no tool provides capability '{capability}'"),
                    );
                }
                Ok(Err(e @ ToolError::Transport(_))) => (FailureKind::StepExecutionError, e.to_string()),
                Err(_) => (
                    FailureKind::StepTimeout,
                    format!("tool call timed out after {timeout_secs}s"),
                ),
            };

            tracing::warn!(
                run_id = %run_id,
                step_id = %step.id,
                capability = %step.capability,
                attempt,
                max_attempts,
                kind = %kind,
                error = %message,
                "step attempt failed"
            );
            {
                let record = &mut execution.steps[index];
                record.error = Some(message.clone());
                record.error_kind = Some(kind);
            }

            if attempt >= max_attempts {
                return fail_step(
                    execution,
                    index,
                    FailureKind::MaxAttemptsExceeded,
                    format!("{kind} after {attempt} attempt(s): {message}"),
                );
            }

            let request = self.reasoner.build_request(
                template,
                execution,
                step,
                &input,
                &message,
                input_schema.clone(),
                attempt,
                max_attempts,
            );
            let outcome = self.reasoner.consult(&request).await;
            execution.steps[index].remedies.push(outcome.record);
            if let Some(corrected) = outcome.corrected_input {
                input = corrected;
            }

            if control.is_cancelled() {
                tracing::info!(run_id = %run_id, step_id = %step.id, "run cancelled between attempts");
                let record = &mut execution.steps[index];
                record.status = StepStatus::Failed;
                record.completed_at = Some(Utc::now());
                return StepOutcome::Cancelled;
            }
        }
    }

    /// Substitute tokens and resolve placeholders for step `index`.
    ///
    /// Only results of completed steps declared before `index` are visible.
    fn resolve_input(
        &self,
        template: &WorkflowTemplate,
        execution: &WorkflowExecution,
        index: usize,
    ) -> Result<Map<String, Value>, String> {
        let step = &template.steps[index];
        let mut scope = Scope::new(&execution.input);
        for (position, (declared, record)) in template.steps.iter().zip(&execution.steps).enumerate().take(index) {
            if record.status == StepStatus::Completed {
                if let Some(result) = &record.result {
                    scope = scope.with_result(&declared.id, position + 1, result);
                }
            }
        }

        let substituted = substitute(&step.input, &scope);
        if !substituted.unresolved.is_empty() {
            tracing::debug!(
                run_id = %execution.id,
                step_id = %step.id,
                tokens = ?substituted.unresolved,
                "tokens left for placeholder resolution"
            );
        }
        if !substituted.coerced.is_empty() {
            tracing::debug!(
                run_id = %execution.id,
                step_id = %step.id,
                tokens = ?substituted.coerced,
                "structured values rendered as text"
            );
        }

        let input = match substituted.value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(format!(
                    "input of step '{}' must be a JSON object, got {other}",
                    step.id
                ));
            }
        };

        self.resolver
            .resolve(input, step, &scope)
            .map(|outcome| outcome.input)
            .map_err(|e| e.to_string())
    }
}

/// A run can be driven when it is pending, its template is valid, and its
/// step records line up with the template's steps.
fn check_runnable(template: &WorkflowTemplate, execution: &WorkflowExecution) -> Result<(), EngineError> {
    validate_template(template)?;
    if execution.status != ExecutionStatus::Pending {
        return Err(EngineError::IllegalTransition(StatusTransitionError {
            from: execution.status,
            to: ExecutionStatus::Running,
        }));
    }
    if execution.template_id != template.id {
        return Err(EngineError::InvalidTemplate(format!(
            "run {} belongs to template '{}', not '{}'",
            execution.id, execution.template_id, template.id
        )));
    }
    let aligned = execution.steps.len() == template.steps.len()
        && execution
            .steps
            .iter()
            .zip(&template.steps)
            .all(|(record, step)| record.step_id == step.id);
    if !aligned {
        return Err(EngineError::InvalidTemplate(format!(
            "run {} step records do not match the steps of template '{}'",
            execution.id, template.id
        )));
    }
    Ok(())
}

/// Mark step `index` failed and build the run-level failure.
fn fail_step(
    execution: &mut WorkflowExecution,
    index: usize,
    kind: FailureKind,
    message: String,
) -> StepOutcome {
    let record = &mut execution.steps[index];
    record.status = StepStatus::Failed;
    record.completed_at = Some(Utc::now());
    record.error = Some(message.clone());
    record.error_kind = Some(kind);
    StepOutcome::Failed(ExecutionFailure {
        step_id: Some(record.step_id.clone()),
        kind,
        message,
    })
}

/// Collect the run output from completed step results.
///
/// With an output schema, each declared key is taken from the latest step
/// whose result exposes it at top level or under a wrapper key. Without
/// one, the last completed result is the output.
pub fn compile_output(template: &WorkflowTemplate, execution: &WorkflowExecution) -> Value {
    let results: Vec<&Value> = execution
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .filter_map(|s| s.result.as_ref())
        .collect();

    let keys = template.output_keys();
    if keys.is_empty() {
        return results.last().map(|v| (*v).clone()).unwrap_or(Value::Null);
    }

    let mut output = Map::new();
    for key in keys {
        let found = results.iter().rev().find_map(|result| {
            let map = result.as_object()?;
            map.get(&key).cloned().or_else(|| {
                WRAPPER_KEYS.iter().find_map(|w| {
                    map.get(*w)
                        .and_then(Value::as_object)
                        .and_then(|inner| inner.get(&key))
                        .cloned()
                })
            })
        });
        if let Some(value) = found {
            output.insert(key, value);
        }
    }
    Value::Object(output)
}
