//! Remedy reasoning for failed step attempts.
//!
//! After a failed attempt the engine packages the failure into a
//! `RemedyRequest` and asks a `RemedyOracle` for corrected input. The
//! reasoner never trusts the answer blindly: keys outside the capability's
//! declared parameters are dropped, and the correction is applied only when
//! the oracle's confidence is above the configured threshold.

use std::time::Duration;

use serde_json::{Map, Value};
use stepwise_types::remedy::{Diagnosis, RemedyRequest, StepDigest};
use stepwise_types::workflow::{
    FailureKind, RemedyRecord, StepStatus, WorkflowExecution, WorkflowStep, WorkflowTemplate,
    schema_keys,
};

use super::summary::ResultSummarizer;

/// Errors reported by an oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// External capability that diagnoses a failed attempt.
///
/// Any implementation honoring the request/response shapes is substitutable;
/// the engine assumes nothing about how it reasons.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait RemedyOracle: Send + Sync {
    fn diagnose(
        &self,
        request: &RemedyRequest,
    ) -> impl std::future::Future<Output = Result<Diagnosis, OracleError>> + Send;
}

/// Rule-based oracle for setups without a reasoning backend.
///
/// Classifies the error text but never proposes new input, so its verdicts
/// always fall below any sensible confidence threshold.
#[derive(Debug, Default, Clone)]
pub struct NoopOracle;

impl RemedyOracle for NoopOracle {
    async fn diagnose(&self, request: &RemedyRequest) -> Result<Diagnosis, OracleError> {
        let lowered = request.error.to_lowercase();
        let (root_cause, remedy_strategy) = if lowered.contains("timeout") || lowered.contains("timed out") {
            ("tool call timed out", "retry unchanged")
        } else if lowered.contains("missing") || lowered.contains("required") {
            ("required parameter missing", "manual fix needed")
        } else {
            ("unclassified tool error", "retry unchanged")
        };
        Ok(Diagnosis {
            root_cause: root_cause.to_string(),
            remedy_strategy: remedy_strategy.to_string(),
            updated_input: Map::new(),
            confidence: 0.0,
        })
    }
}

/// Result of consulting the oracle once.
#[derive(Debug, Clone, PartialEq)]
pub struct RemedyOutcome {
    pub record: RemedyRecord,
    /// Input for the next attempt when the remedy was accepted.
    pub corrected_input: Option<Map<String, Value>>,
}

/// Applies oracle verdicts under a confidence threshold and schema filter.
pub struct RemedyReasoner<O: RemedyOracle> {
    oracle: O,
    summarizer: Box<dyn ResultSummarizer>,
    confidence_threshold: f64,
    oracle_timeout: Duration,
}

impl<O: RemedyOracle> RemedyReasoner<O> {
    pub fn new(
        oracle: O,
        summarizer: Box<dyn ResultSummarizer>,
        confidence_threshold: f64,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            summarizer,
            confidence_threshold,
            oracle_timeout,
        }
    }

    /// Replace the summarizer used for prior-step digests.
    pub fn with_summarizer(mut self, summarizer: Box<dyn ResultSummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Package a failed attempt for the oracle.
    ///
    /// Only steps declared before `step` that completed contribute a digest.
    #[allow(clippy::too_many_arguments)]
    pub fn build_request(
        &self,
        template: &WorkflowTemplate,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        attempted_input: &Map<String, Value>,
        error: &str,
        input_schema: Option<Value>,
        attempt: u32,
        max_attempts: u32,
    ) -> RemedyRequest {
        let prior_steps = template
            .steps
            .iter()
            .zip(&execution.steps)
            .take_while(|(s, _)| s.id != step.id)
            .filter(|(_, e)| e.status == StepStatus::Completed)
            .filter_map(|(s, e)| {
                e.result.as_ref().map(|result| StepDigest {
                    step_id: s.id.clone(),
                    capability: s.capability.clone(),
                    summary: self.summarizer.summarize(&s.id, result),
                })
            })
            .collect();

        RemedyRequest {
            tool: step.tool.clone(),
            capability: step.capability.clone(),
            step_id: step.id.clone(),
            attempted_input: attempted_input.clone(),
            error: error.to_string(),
            prior_steps,
            input_schema,
            attempt,
            max_attempts,
        }
    }

    /// Ask the oracle about a failed attempt and decide whether to apply it.
    ///
    /// Oracle errors and timeouts count as a rejected remedy.
    pub async fn consult(&self, request: &RemedyRequest) -> RemedyOutcome {
        let diagnosis = match tokio::time::timeout(self.oracle_timeout, self.oracle.diagnose(request)).await {
            Ok(Ok(diagnosis)) => diagnosis,
            Ok(Err(e)) => {
                tracing::warn!(step_id = %request.step_id, attempt = request.attempt, error = %e, "remedy oracle failed");
                return rejected(request.attempt, format!("oracle error: {e}"), FailureKind::RemedyLowConfidence);
            }
            Err(_) => {
                tracing::warn!(
                    step_id = %request.step_id,
                    attempt = request.attempt,
                    timeout_secs = self.oracle_timeout.as_secs(),
                    "remedy oracle timed out"
                );
                return rejected(request.attempt, "oracle timed out".to_string(), FailureKind::RemedyLowConfidence);
            }
        };

        let allowed = match schema_keys(request.input_schema.as_ref()) {
            keys if !keys.is_empty() => keys,
            _ => request.attempted_input.keys().cloned().collect(),
        };

        let proposed = diagnosis.updated_input.len();
        let filtered: Map<String, Value> = diagnosis
            .updated_input
            .iter()
            .filter(|(k, _)| allowed.iter().any(|a| a == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if filtered.len() < proposed {
            tracing::debug!(
                step_id = %request.step_id,
                dropped = proposed - filtered.len(),
                "remedy proposed undeclared parameters"
            );
        }

        let mut record = RemedyRecord {
            attempt: request.attempt,
            confidence: diagnosis.confidence,
            root_cause: diagnosis.root_cause,
            remedy_strategy: diagnosis.remedy_strategy,
            applied: false,
            rejection: None,
        };

        if filtered.is_empty() {
            record.rejection = Some(FailureKind::RemedyInvalidSchema);
            tracing::info!(
                step_id = %request.step_id,
                attempt = request.attempt,
                "remedy rejected: no declared parameters left after filtering"
            );
            return RemedyOutcome {
                record,
                corrected_input: None,
            };
        }

        if record.confidence <= self.confidence_threshold {
            record.rejection = Some(FailureKind::RemedyLowConfidence);
            tracing::info!(
                step_id = %request.step_id,
                attempt = request.attempt,
                confidence = record.confidence,
                threshold = self.confidence_threshold,
                "remedy rejected: confidence too low"
            );
            return RemedyOutcome {
                record,
                corrected_input: None,
            };
        }

        let mut corrected = request.attempted_input.clone();
        corrected.extend(filtered);
        record.applied = true;
        tracing::info!(
            step_id = %request.step_id,
            attempt = request.attempt,
            confidence = record.confidence,
            strategy = %record.remedy_strategy,
            "remedy accepted"
        );
        RemedyOutcome {
            record,
            corrected_input: Some(corrected),
        }
    }
}

fn rejected(attempt: u32, root_cause: String, kind: FailureKind) -> RemedyOutcome {
    RemedyOutcome {
        record: RemedyRecord {
            attempt,
            confidence: 0.0,
            root_cause,
            remedy_strategy: String::new(),
            applied: false,
            rejection: Some(kind),
        },
        corrected_input: None,
    }
}
