//! Workflow domain types for Stepwise.
//!
//! Defines the template-level representation of a workflow (`WorkflowTemplate`
//! and its `WorkflowStep`s) and the run-level tracking records
//! (`WorkflowExecution`, `StepExecution`). Templates are immutable apart from
//! their rolling statistics; executions are mutable while running and frozen
//! once they reach a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StatusTransitionError;

/// Namespace holding system templates visible to every owner.
pub const SHARED_OWNER: &str = "__shared__";

/// Smoothing factor for the `average_duration_secs` moving average.
pub const DURATION_EMA_SMOOTHING: f64 = 0.2;

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A named, versioned, reusable sequence of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Template ID, unique within an owner namespace.
    pub id: String,
    /// Human-readable template name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub origin: TemplateOrigin,
    /// Owner namespace the template is stored under.
    pub owner: String,
    /// Steps in declared execution order.
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub stats: TemplateStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Keys listed here are collected from step results into the run output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowTemplate {
    /// Create a manual template with a fresh UUIDv7 id and zeroed statistics.
    pub fn new(name: impl Into<String>, owner: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            description: None,
            version: default_version(),
            origin: TemplateOrigin::Manual,
            owner: owner.into(),
            steps,
            stats: TemplateStats::default(),
            input_schema: None,
            output_schema: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a step by ID.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Keys declared by the output schema.
    ///
    /// Accepts either a JSON-Schema-like object (`{"properties": {...}}`), a
    /// plain object whose keys are the output names, or an array of names.
    pub fn output_keys(&self) -> Vec<String> {
        schema_keys(self.output_schema.as_ref())
    }
}

/// Extract the declared parameter names from a loosely specified schema.
pub fn schema_keys(schema: Option<&Value>) -> Vec<String> {
    match schema {
        Some(Value::Object(map)) => match map.get("properties") {
            Some(Value::Object(props)) => props.keys().cloned().collect(),
            _ => map.keys().cloned().collect(),
        },
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// How a template came into existence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateOrigin {
    #[default]
    Manual,
    AutoGenerated,
    Imported,
    Shared,
}

/// Rolling execution statistics kept on each template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub success_rate: f64,
    /// Exponential moving average of run duration in seconds.
    pub average_duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl TemplateStats {
    /// Fold one run outcome into the statistics.
    ///
    /// The first sample seeds the average; later samples are blended with
    /// `DURATION_EMA_SMOOTHING`, so the result depends on sample order.
    pub fn record(&mut self, success: bool, duration_secs: f64, at: DateTime<Utc>) {
        let first_sample = self.total_executions == 0;
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        }
        self.success_rate = self.successful_executions as f64 / self.total_executions as f64;
        self.average_duration_secs = if first_sample {
            duration_secs
        } else {
            DURATION_EMA_SMOOTHING * duration_secs
                + (1.0 - DURATION_EMA_SMOOTHING) * self.average_duration_secs
        };
        self.last_executed_at = Some(at);
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single tool invocation inside a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step ID, unique within the template.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tool that provides the capability (used for logging and diagnosis).
    pub tool: String,
    /// Capability name passed to the tool registry.
    pub capability: String,
    #[serde(default)]
    pub kind: StepKind,
    /// Input expression; string leaves may contain `{{...}}` tokens and
    /// placeholders.
    #[serde(default = "empty_object")]
    pub input: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional JEXL condition; the step is skipped when it is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Retry budget (total attempts), clamped to the engine ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl WorkflowStep {
    /// Create a tool step with an input expression and no dependencies.
    pub fn new(
        id: impl Into<String>,
        tool: impl Into<String>,
        capability: impl Into<String>,
        input: Value,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            tool: tool.into(),
            capability: capability.into(),
            kind: StepKind::Tool,
            input,
            depends_on: Vec::new(),
            condition: None,
            max_attempts: None,
            timeout_secs: None,
        }
    }

    /// Builder: add a dependency.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// The kind of step. `Parallel` is reserved and never executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    #[default]
    Tool,
    Parallel,
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Forward-only transitions, plus the `Running <-> Paused` detour.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Failed | Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Cancelled)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of an individual step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Whether a dependent step may proceed past this one.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Classification of a step (and therefore run) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TemplateNotFound,
    DependencyUnmet,
    ToolNotFound,
    StepTimeout,
    StepExecutionError,
    RemedyLowConfidence,
    RemedyInvalidSchema,
    MaxAttemptsExceeded,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::TemplateNotFound => "template_not_found",
            FailureKind::DependencyUnmet => "dependency_unmet",
            FailureKind::ToolNotFound => "tool_not_found",
            FailureKind::StepTimeout => "step_timeout",
            FailureKind::StepExecutionError => "step_execution_error",
            FailureKind::RemedyLowConfidence => "remedy_low_confidence",
            FailureKind::RemedyInvalidSchema => "remedy_invalid_schema",
            FailureKind::MaxAttemptsExceeded => "max_attempts_exceeded",
        };
        f.write_str(s)
    }
}

/// Terminal error recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Step execution
// ---------------------------------------------------------------------------

/// Outcome of one remedy consultation for a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemedyRecord {
    /// Attempt number whose failure triggered the consultation.
    pub attempt: u32,
    pub confidence: f64,
    pub root_cause: String,
    pub remedy_strategy: String,
    /// Whether the corrected input was used for the next attempt.
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<FailureKind>,
}

/// Per-step state within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    /// Input actually sent on the latest attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default)]
    pub remedies: Vec<RemedyRecord>,
}

impl StepExecution {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            resolved_input: None,
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            result: None,
            error: None,
            error_kind: None,
            remedies: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow execution
// ---------------------------------------------------------------------------

/// One concrete run of a template against a specific input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub template_id: String,
    /// Template name (denormalized for display).
    pub template_name: String,
    pub owner: String,
    pub status: ExecutionStatus,
    pub input: Value,
    /// One entry per template step, in declared order.
    pub steps: Vec<StepExecution>,
    pub current_step_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failed run this one was manually resumed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<Uuid>,
}

impl WorkflowExecution {
    /// Create a pending run with one pending `StepExecution` per template step.
    pub fn new(template: &WorkflowTemplate, owner: impl Into<String>, input: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            owner: owner.into(),
            status: ExecutionStatus::Pending,
            input,
            steps: template
                .steps
                .iter()
                .map(|s| StepExecution::pending(&s.id))
                .collect(),
            current_step_index: 0,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            resumed_from: None,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Recorded result of a completed step.
    pub fn result_of(&self, step_id: &str) -> Option<&Value> {
        self.step(step_id)
            .filter(|s| s.status == StepStatus::Completed)
            .and_then(|s| s.result.as_ref())
    }

    /// Move to `next`, enforcing the run state machine.
    ///
    /// Sets `started_at` on first entry to `Running` and stamps completion
    /// time and duration on terminal states.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            let start = self.started_at.unwrap_or(self.created_at);
            self.duration_ms = Some((now - start).num_milliseconds().max(0) as u64);
        }
        self.status = next;
        Ok(())
    }
}
