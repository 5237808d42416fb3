//! Request and response shapes exchanged with the remedy oracle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Failure context handed to the oracle after a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemedyRequest {
    pub tool: String,
    pub capability: String,
    pub step_id: String,
    /// Input sent on the failed attempt.
    pub attempted_input: Map<String, Value>,
    pub error: String,
    /// Summaries of the steps that completed before this one.
    pub prior_steps: Vec<StepDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Budgeted summary of one prior step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDigest {
    pub step_id: String,
    pub capability: String,
    pub summary: Value,
}

/// Oracle verdict on a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub root_cause: String,
    pub remedy_strategy: String,
    #[serde(default)]
    pub updated_input: Map<String, Value>,
    pub confidence: f64,
}
